//! Processing Metadata
//!
//! Attached to every stored output partition. The `source-etag` entry is
//! what makes ingestion idempotent: a later trigger for the same source key
//! compares it with the current object fingerprint.

use sdp_common::{Error, Result};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const SOURCE_ETAG: &str = "source-etag";
pub const PROCESSED_AT: &str = "processed-at";
pub const VALID_COUNT: &str = "valid-count";
pub const INVALID_COUNT: &str = "invalid-count";
pub const CORRELATION_ID: &str = "correlation-id";
pub const RECORD_COUNT: &str = "record-count";
pub const SOURCE_KEY: &str = "source-key";
pub const FILE_HASH: &str = "file-hash";

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingMetadata {
    pub source_etag: String,
    /// RFC 3339
    pub processed_at: String,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub correlation_id: Uuid,
    /// Rows in the partition carrying this metadata
    pub record_count: usize,
    pub source_key: String,
    /// SHA-256 of the partition bytes
    pub file_hash: String,
}

impl ProcessingMetadata {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (SOURCE_ETAG.to_string(), self.source_etag.clone()),
            (PROCESSED_AT.to_string(), self.processed_at.clone()),
            (VALID_COUNT.to_string(), self.valid_count.to_string()),
            (INVALID_COUNT.to_string(), self.invalid_count.to_string()),
            (CORRELATION_ID.to_string(), self.correlation_id.to_string()),
            (RECORD_COUNT.to_string(), self.record_count.to_string()),
            (SOURCE_KEY.to_string(), self.source_key.clone()),
            (FILE_HASH.to_string(), self.file_hash.clone()),
        ])
    }

    /// Rebuild from stored attributes; `source-etag`, the counts and the
    /// correlation id are required, the rest default to empty/zero
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let required = |key: &str| {
            map.get(key)
                .ok_or_else(|| Error::InvalidInput(format!("processing metadata missing {}", key)))
        };
        let count = |key: &str| -> Result<usize> {
            required(key)?
                .parse()
                .map_err(|_| Error::InvalidInput(format!("processing metadata {} is not a count", key)))
        };

        Ok(Self {
            source_etag: required(SOURCE_ETAG)?.clone(),
            processed_at: map.get(PROCESSED_AT).cloned().unwrap_or_default(),
            valid_count: count(VALID_COUNT)?,
            invalid_count: count(INVALID_COUNT)?,
            correlation_id: sdp_common::uuid_utils::parse(required(CORRELATION_ID)?)?,
            record_count: map.get(RECORD_COUNT).and_then(|v| v.parse().ok()).unwrap_or(0),
            source_key: map.get(SOURCE_KEY).cloned().unwrap_or_default(),
            file_hash: map.get(FILE_HASH).cloned().unwrap_or_default(),
        })
    }
}
