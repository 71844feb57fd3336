//! Data models for the pipeline
//!
//! - Records and their raw row form (ingestion, analysis input)
//! - Processing Metadata attached to output partitions
//! - Analysis Results persisted by analysis and consumed by notification

pub mod analysis;
pub mod metadata;
pub mod record;

pub use analysis::{normalize_numbers, AnalysisResult, Anomaly, Insight, Level, ParsedAnalysis, Recommendation};
pub use metadata::ProcessingMetadata;
pub use record::{RawRow, Record, Region, CANONICAL_FIELDS, REQUIRED_FIELDS};
