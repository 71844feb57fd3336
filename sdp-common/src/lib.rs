//! # SDP Common Library
//!
//! Shared code for the batch analysis pipeline:
//! - Error taxonomy (`Error`, `Result`) used by every stage
//! - Pipeline configuration loading (TOML → ENV → CLI)
//! - Stage events, the `EventBus` and the `EventPublisher` capability
//! - Bounded exponential-backoff retry wrapper
//! - SQLite pool initialization
//! - Logging, time and UUID helpers

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod retry;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use events::{EventBus, EventKind, EventPublisher, StageEvent};
pub use retry::{retry_with_backoff, RetryPolicy};
