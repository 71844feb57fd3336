//! Common error types for the pipeline
//!
//! Every collaborator (object store, result store, model client, notification
//! channel) reports failures through this enum so that the retry wrapper can
//! tell transient faults from deterministic ones with a single
//! [`Error::is_transient`] check.

use thiserror::Error;

/// Common result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across pipeline stages
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input (malformed file, bad event payload)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Network or service hiccup; eligible for retry
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Rejected by a collaborator in a way retrying cannot fix
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Retry wrapper gave up
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the retry wrapper should try the failed operation again.
    ///
    /// I/O errors count as transient except for the kinds that will not
    /// change between attempts (missing file, permission denied, bad data).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transient(_) => true,
            Error::Io(err) => !matches!(
                err.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidData
                    | std::io::ErrorKind::InvalidInput
            ),
            #[cfg(feature = "sqlx")]
            Error::Database(db_err) => {
                matches!(db_err, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
                    || db_err.to_string().contains("database is locked")
            }
            _ => false,
        }
    }

    /// Short machine-readable category used in structured log fields
    pub fn category(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlx")]
            Error::Database(_) => "database",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Config(_) => "config",
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::Transient(_) => "transient",
            Error::Permanent(_) => "permanent",
            Error::RetriesExhausted { .. } => "retries_exhausted",
            Error::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transient("timeout".into()).is_transient());
        assert!(Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow")).is_transient());
        assert!(!Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")).is_transient());
        assert!(!Error::Permanent("unverified sender".into()).is_transient());
        assert!(!Error::InvalidInput("bad csv".into()).is_transient());
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = Error::RetriesExhausted {
            operation: "fetch input/a.csv".into(),
            attempts: 3,
            last_error: "Transient failure: reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "fetch input/a.csv failed after 3 attempts: Transient failure: reset"
        );
        assert_eq!(err.category(), "retries_exhausted");
    }
}
