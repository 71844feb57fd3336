//! Ingestion Stage
//!
//! Turns one raw batch file into a valid partition and a rejected
//! partition, both tagged with Processing Metadata, then publishes
//! `ProcessingComplete` pointing at the valid partition.
//!
//! **Idempotency:** a trigger whose source fingerprint matches the
//! `source-etag` stored on an earlier valid partition for the same source
//! key returns the earlier counts and correlation id. Nothing is written or
//! published again.
//!
//! **Write order:** rejected partition first, valid partition last. The
//! valid partition is what the idempotency check looks for, so a run that
//! died between the two uploads is simply redone.

use super::{parse_csv, write_csv};
use crate::error::{StageError, StageResult};
use crate::models::metadata::{SOURCE_ETAG, SOURCE_KEY};
use crate::models::{ProcessingMetadata, Record, CANONICAL_FIELDS};
use crate::storage::{fingerprint, ObjectStore};
use crate::validators::RecordValidator;
use chrono::{DateTime, Utc};
use sdp_common::config::StorageConfig;
use sdp_common::events::ProcessingCompleteDetail;
use sdp_common::{retry_with_backoff, Error, EventPublisher, RetryPolicy, StageEvent};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const STAGE: &str = "ingestion";

/// Counts and locations of one ingestion run
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionSummary {
    pub correlation_id: Uuid,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub processed_key: Option<String>,
    pub rejected_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestionOutcome {
    /// Outputs written and `ProcessingComplete` published
    Processed(IngestionSummary),
    /// Same content was processed before; prior counts returned
    AlreadyProcessed(IngestionSummary),
    /// Key is not an input batch file
    Skipped { reason: String },
}

impl IngestionOutcome {
    pub fn summary(&self) -> Option<&IngestionSummary> {
        match self {
            IngestionOutcome::Processed(s) | IngestionOutcome::AlreadyProcessed(s) => Some(s),
            IngestionOutcome::Skipped { .. } => None,
        }
    }
}

/// Rejected row as it will be written
struct RejectedRow {
    cells: Vec<String>,
    reason: String,
    row_number: usize,
}

pub struct IngestionStage {
    store: Arc<dyn ObjectStore>,
    publisher: Arc<dyn EventPublisher>,
    storage: StorageConfig,
    retry: RetryPolicy,
    validator: RecordValidator,
}

impl IngestionStage {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        publisher: Arc<dyn EventPublisher>,
        storage: StorageConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            publisher,
            storage,
            retry,
            validator: RecordValidator::new(),
        }
    }

    /// Replace the validator (fixed reference year in tests)
    pub fn with_validator(mut self, validator: RecordValidator) -> Self {
        self.validator = validator;
        self
    }

    /// File name without directories or `.csv`
    fn base_name(source_key: &str) -> &str {
        let file_name = source_key.rsplit('/').next().unwrap_or(source_key);
        file_name.strip_suffix(".csv").unwrap_or(file_name)
    }

    /// Partition keys; the short correlation id keeps same-named sources in
    /// one second apart
    fn output_keys(&self, source_key: &str, at: DateTime<Utc>, correlation_id: &Uuid) -> (String, String) {
        let base = Self::base_name(source_key);
        let stamp = sdp_common::time::key_timestamp(at);
        let short = sdp_common::uuid_utils::short(correlation_id);
        (
            format!("{}{}_processed_{}_{}.csv", self.storage.valid_prefix, base, stamp, short),
            format!("{}{}_rejected_{}_{}.csv", self.storage.invalid_prefix, base, stamp, short),
        )
    }

    /// Why `source_key` is not an input batch file, if it isn't
    fn skip_reason(&self, source_key: &str) -> Option<String> {
        if !source_key.starts_with(&self.storage.input_prefix) {
            return Some(format!("key outside input prefix '{}'", self.storage.input_prefix));
        }
        if !source_key.ends_with(".csv") {
            return Some("not a .csv file".to_string());
        }
        None
    }

    /// Processing Metadata of an earlier run over the same content, if any
    ///
    /// Read failures are logged and treated as "not processed".
    pub async fn find_prior_run(&self, source_key: &str, current_fingerprint: &str) -> Option<ProcessingMetadata> {
        match self.lookup_prior_run(source_key, current_fingerprint).await {
            Ok(prior) => prior,
            Err(e) => {
                warn!(
                    object_key = %source_key,
                    error = %e,
                    "Could not read processing metadata, treating as not processed"
                );
                None
            }
        }
    }

    async fn lookup_prior_run(
        &self,
        source_key: &str,
        current_fingerprint: &str,
    ) -> sdp_common::Result<Option<ProcessingMetadata>> {
        let prefix = format!(
            "{}{}_processed_",
            self.storage.valid_prefix,
            Self::base_name(source_key)
        );

        // Newest first
        for key in self.store.list(&prefix).await?.iter().rev() {
            let Some(info) = self.store.head(key).await? else {
                continue;
            };
            let same_source = info.metadata.get(SOURCE_KEY).map(String::as_str) == Some(source_key);
            let same_content = info.metadata.get(SOURCE_ETAG).map(String::as_str) == Some(current_fingerprint);
            if same_source && same_content {
                return ProcessingMetadata::from_map(&info.metadata).map(Some);
            }
        }
        Ok(None)
    }

    /// Whether content with this fingerprint was already processed for `source_key`
    pub async fn is_already_processed(&self, source_key: &str, current_fingerprint: &str) -> bool {
        self.find_prior_run(source_key, current_fingerprint).await.is_some()
    }

    /// Validate one batch file, write both partitions, publish `ProcessingComplete`
    pub async fn process_file(&self, source_key: &str) -> StageResult<IngestionOutcome> {
        if let Some(reason) = self.skip_reason(source_key) {
            warn!(object_key = %source_key, %reason, "Skipping object");
            return Ok(IngestionOutcome::Skipped { reason });
        }

        info!(object_key = %source_key, "Processing batch file");

        let object = retry_with_backoff(&format!("fetch {}", source_key), &self.retry, || {
            self.store.get(source_key)
        })
        .await
        .map_err(|e| self.fail(None, source_key, e))?;

        if let Some(prior) = self.find_prior_run(source_key, &object.fingerprint).await {
            info!(
                object_key = %source_key,
                correlation_id = %prior.correlation_id,
                "Source already processed with this fingerprint, skipping"
            );
            return Ok(IngestionOutcome::AlreadyProcessed(IngestionSummary {
                correlation_id: prior.correlation_id,
                valid_count: prior.valid_count,
                invalid_count: prior.invalid_count,
                processed_key: None,
                rejected_key: None,
            }));
        }

        let correlation_id = sdp_common::uuid_utils::generate();
        let table = parse_csv(&object.body).map_err(|e| self.fail(Some(correlation_id), source_key, e))?;

        let mut valid: Vec<Record> = Vec::new();
        let mut rejected: Vec<RejectedRow> = Vec::new();
        for (index, (raw, cells)) in table.raw_rows().zip(table.rows.iter()).enumerate() {
            match self.validator.validate(&raw) {
                Ok(record) => valid.push(record),
                Err(reason) => rejected.push(RejectedRow {
                    cells: cells.clone(),
                    reason,
                    // header is row 1
                    row_number: index + 2,
                }),
            }
        }

        let now = sdp_common::time::now();
        let (processed_key, rejected_key) = self.output_keys(source_key, now, &correlation_id);
        let processed_at = now.to_rfc3339();
        let correlation = correlation_id.to_string();

        let rejected_headers: Vec<String> = table
            .headers
            .iter()
            .cloned()
            .chain(
                ["rejection_reason", "rejected_at", "correlation_id", "row_number", "source_file"]
                    .map(String::from),
            )
            .collect();
        let rejected_rows: Vec<Vec<String>> = rejected
            .iter()
            .map(|r| {
                let mut cells = r.cells.clone();
                cells.resize(table.headers.len(), String::new());
                cells.extend([
                    r.reason.clone(),
                    processed_at.clone(),
                    correlation.clone(),
                    r.row_number.to_string(),
                    source_key.to_string(),
                ]);
                cells
            })
            .collect();

        let valid_headers: Vec<String> = CANONICAL_FIELDS
            .iter()
            .chain(["processed_at", "correlation_id", "source_file"].iter())
            .map(|s| s.to_string())
            .collect();
        let valid_rows: Vec<Vec<String>> = valid
            .iter()
            .map(|record| {
                let mut cells = record.to_csv_fields();
                cells.extend([processed_at.clone(), correlation.clone(), source_key.to_string()]);
                cells
            })
            .collect();

        let rejected_body = write_csv(&rejected_headers, &rejected_rows)?;
        let valid_body = write_csv(&valid_headers, &valid_rows)?;

        let metadata_for = |body: &[u8], record_count: usize| ProcessingMetadata {
            source_etag: object.fingerprint.clone(),
            processed_at: processed_at.clone(),
            valid_count: valid.len(),
            invalid_count: rejected.len(),
            correlation_id,
            record_count,
            source_key: source_key.to_string(),
            file_hash: fingerprint(body),
        };

        self.upload(&rejected_key, rejected_body.clone(), metadata_for(&rejected_body, rejected.len()))
            .await?;
        self.upload(&processed_key, valid_body.clone(), metadata_for(&valid_body, valid.len()))
            .await?;

        let detail = ProcessingCompleteDetail {
            source_file: source_key.to_string(),
            processed_file: processed_key.clone(),
            rejected_file: Some(rejected_key.clone()),
            valid_records: valid.len(),
            invalid_records: rejected.len(),
            data_quality_score: ProcessingCompleteDetail::quality_score(valid.len(), rejected.len()),
        };
        let quality = detail.data_quality_score;

        self.publisher
            .publish(StageEvent::ProcessingComplete { correlation_id, detail })
            .await
            .map_err(|e| self.fail(Some(correlation_id), source_key, e))?;

        info!(
            correlation_id = %correlation_id,
            object_key = %source_key,
            valid = valid.len(),
            invalid = rejected.len(),
            valid_pct = quality,
            "Batch file processed"
        );

        Ok(IngestionOutcome::Processed(IngestionSummary {
            correlation_id,
            valid_count: valid.len(),
            invalid_count: rejected.len(),
            processed_key: Some(processed_key),
            rejected_key: Some(rejected_key),
        }))
    }

    async fn upload(&self, key: &str, body: Vec<u8>, metadata: ProcessingMetadata) -> StageResult<()> {
        let correlation_id = metadata.correlation_id;
        let attributes = metadata.to_map();
        retry_with_backoff(&format!("upload {}", key), &self.retry, || {
            self.store.put(key, body.clone(), attributes.clone())
        })
        .await
        .map_err(|e| self.fail(Some(correlation_id), key, e))?;
        Ok(())
    }

    fn fail(&self, correlation_id: Option<Uuid>, object_key: &str, err: Error) -> StageError {
        match err {
            Error::NotFound(what) => StageError::NotFound(what),
            other => {
                tracing::error!(
                    correlation_id = ?correlation_id,
                    object_key = %object_key,
                    category = other.category(),
                    error = %other,
                    "Ingestion failed"
                );
                StageError::fatal(STAGE, correlation_id, other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryObjectStore;
    use sdp_common::events::RecordingPublisher;

    fn stage(store: Arc<InMemoryObjectStore>, publisher: Arc<RecordingPublisher>) -> IngestionStage {
        IngestionStage::new(store, publisher, StorageConfig::default(), RetryPolicy::new(3, 1, 2))
            .with_validator(RecordValidator::with_current_year(2024))
    }

    #[test]
    fn test_output_keys() {
        let store = Arc::new(InMemoryObjectStore::new());
        let stage = stage(store, Arc::new(RecordingPublisher::new()));
        let at = DateTime::parse_from_rfc3339("2024-03-26T10:15:00Z").unwrap().with_timezone(&Utc);

        let correlation_id = Uuid::parse_str("1a2b3c4d-0000-4000-8000-000000000000").unwrap();

        let (valid, rejected) = stage.output_keys("input/2024/sales.csv", at, &correlation_id);
        assert_eq!(valid, "processed/sales_processed_20240326_101500_1a2b3c4d.csv");
        assert_eq!(rejected, "rejected/sales_rejected_20240326_101500_1a2b3c4d.csv");
    }

    #[tokio::test]
    async fn test_non_input_keys_are_skipped() {
        let store = Arc::new(InMemoryObjectStore::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let stage = stage(store.clone(), publisher.clone());

        for key in ["processed/a.csv", "input/readme.txt"] {
            let outcome = stage.process_file(key).await.unwrap();
            assert!(matches!(outcome, IngestionOutcome::Skipped { .. }));
        }
        assert_eq!(store.put_count(), 0);
        assert!(publisher.is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let store = Arc::new(InMemoryObjectStore::new());
        let stage = stage(store, Arc::new(RecordingPublisher::new()));
        assert!(matches!(stage.process_file("input/gone.csv").await, Err(StageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_transient_fetch_is_retried() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("input/a.csv", "order_id,date,model,brand,price,region\n");
        store.fail_next_gets([Error::Transient("reset".into()), Error::Transient("reset".into())]);
        let publisher = Arc::new(RecordingPublisher::new());

        let outcome = stage(store, publisher.clone()).process_file("input/a.csv").await.unwrap();

        assert!(matches!(outcome, IngestionOutcome::Processed(_)));
        assert_eq!(publisher.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_exhaustion_publishes_nothing() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("input/a.csv", "order_id\n");
        store.fail_next_gets((0..3).map(|_| Error::Transient("reset".into())));
        let publisher = Arc::new(RecordingPublisher::new());

        let err = stage(store.clone(), publisher.clone()).process_file("input/a.csv").await.unwrap_err();

        assert!(err.is_fatal());
        assert!(publisher.is_empty());
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_file_is_fatal_without_outputs() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("input/bad.csv", b"order_id,price\n\xff\xfe,1\n".to_vec());
        let publisher = Arc::new(RecordingPublisher::new());

        let err = stage(store.clone(), publisher.clone()).process_file("input/bad.csv").await.unwrap_err();

        assert!(err.is_fatal());
        assert!(publisher.is_empty());
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_file_still_publishes() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("input/empty.csv", "");
        let publisher = Arc::new(RecordingPublisher::new());

        let outcome = stage(store.clone(), publisher.clone()).process_file("input/empty.csv").await.unwrap();

        let summary = outcome.summary().unwrap();
        assert_eq!((summary.valid_count, summary.invalid_count), (0, 0));
        assert_eq!(store.put_count(), 2);
        assert_eq!(publisher.len(), 1);
    }
}
