//! sdp-pipeline library interface
//!
//! Three stages (ingestion, analysis, notification) choreographed through
//! stage-complete events. No stage calls another; the [`router::EventRouter`]
//! hands each event to the single handler registered for its kind.

pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod router;
pub mod services;
pub mod stages;
pub mod storage;
pub mod validators;

pub use crate::error::{StageError, StageResult};
pub use crate::pipeline::{Components, Pipeline};
