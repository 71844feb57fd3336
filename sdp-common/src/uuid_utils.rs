//! UUID utilities

use crate::{Error, Result};
use uuid::Uuid;

/// Generate a new correlation identifier
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse a correlation identifier from user or metadata input
pub fn parse(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s.trim()).map_err(|e| Error::InvalidInput(format!("invalid UUID '{}': {}", s, e)))
}

/// First eight hex characters, used in human-facing identifiers
pub fn short(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
