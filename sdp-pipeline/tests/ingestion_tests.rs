//! Integration tests for the ingestion stage
//!
//! Partition layout, idempotent re-delivery and fingerprint-based
//! reprocessing against the in-memory object store.

mod helpers;

use helpers::{sample_batch, test_config, TestDoubles, GOOD_ROW_1, GOOD_ROW_2, MISSING_PRICE_ROW};
use sdp_common::events::RecordingPublisher;
use sdp_common::{EventPublisher, StageEvent};
use sdp_pipeline::models::metadata::{SOURCE_ETAG, SOURCE_KEY};
use sdp_pipeline::stages::{IngestionOutcome, IngestionStage};
use sdp_pipeline::storage::{fingerprint, ObjectStore};
use sdp_pipeline::validators::RecordValidator;
use std::sync::Arc;
use tempfile::TempDir;

const SOURCE: &str = "input/sales.csv";

fn stage(doubles: &TestDoubles, recorder: &Arc<RecordingPublisher>) -> IngestionStage {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let publisher: Arc<dyn EventPublisher> = recorder.clone();
    IngestionStage::new(doubles.store.clone(), publisher, config.storage, config.retry)
        .with_validator(RecordValidator::with_current_year(2024))
}

#[tokio::test]
async fn test_partitions_and_event_for_mixed_batch() {
    let doubles = TestDoubles::new().await.unwrap();
    let recorder = Arc::new(RecordingPublisher::new());
    let ingestion = stage(&doubles, &recorder);
    doubles
        .store
        .insert(SOURCE, sample_batch(&[GOOD_ROW_1, GOOD_ROW_2, MISSING_PRICE_ROW]));

    let outcome = ingestion.process_file(SOURCE).await.unwrap();

    let summary = match outcome {
        IngestionOutcome::Processed(summary) => summary,
        other => panic!("expected Processed, got {:?}", other),
    };
    assert_eq!(summary.valid_count, 2);
    assert_eq!(summary.invalid_count, 1);

    let processed_key = summary.processed_key.clone().unwrap();
    let rejected_key = summary.rejected_key.clone().unwrap();
    assert!(processed_key.starts_with("processed/sales_processed_"));
    assert!(rejected_key.starts_with("rejected/sales_rejected_"));

    // Rejected row carries the original cells plus its reason
    let rejected = doubles.store.get(&rejected_key).await.unwrap();
    let rejected_text = String::from_utf8(rejected.body).unwrap();
    assert!(rejected_text.contains("ORD-1003"));
    assert!(rejected_text.contains("missing required field: price"));

    // Partition metadata ties the output back to the source content
    let source = doubles.store.get(SOURCE).await.unwrap();
    let valid = doubles.store.get(&processed_key).await.unwrap();
    assert_eq!(valid.metadata.get(SOURCE_ETAG), Some(&source.fingerprint));
    assert_eq!(valid.metadata.get(SOURCE_KEY).map(String::as_str), Some(SOURCE));

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        StageEvent::ProcessingComplete { correlation_id, detail } => {
            assert_eq!(*correlation_id, summary.correlation_id);
            assert_eq!(detail.processed_file, processed_key);
            assert_eq!(detail.valid_records, 2);
            assert_eq!(detail.invalid_records, 1);
            assert_eq!(detail.data_quality_score, 66.67);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_redelivery_writes_outputs_once() {
    let doubles = TestDoubles::new().await.unwrap();
    let recorder = Arc::new(RecordingPublisher::new());
    let ingestion = stage(&doubles, &recorder);
    doubles.store.insert(SOURCE, sample_batch(&[GOOD_ROW_1, MISSING_PRICE_ROW]));

    let first = ingestion.process_file(SOURCE).await.unwrap();
    let second = ingestion.process_file(SOURCE).await.unwrap();

    let first = first.summary().unwrap().clone();
    match second {
        IngestionOutcome::AlreadyProcessed(prior) => {
            assert_eq!(prior.correlation_id, first.correlation_id);
            assert_eq!(prior.valid_count, 1);
            assert_eq!(prior.invalid_count, 1);
        }
        other => panic!("expected AlreadyProcessed, got {:?}", other),
    }

    // Two partitions from the first delivery, nothing from the second
    assert_eq!(doubles.store.put_count(), 2);
    assert_eq!(recorder.len(), 1);
}

#[tokio::test]
async fn test_changed_content_is_reprocessed() {
    let doubles = TestDoubles::new().await.unwrap();
    let recorder = Arc::new(RecordingPublisher::new());
    let ingestion = stage(&doubles, &recorder);

    doubles.store.insert(SOURCE, sample_batch(&[GOOD_ROW_1]));
    ingestion.process_file(SOURCE).await.unwrap();

    doubles.store.insert(SOURCE, sample_batch(&[GOOD_ROW_1, GOOD_ROW_2]));
    let outcome = ingestion.process_file(SOURCE).await.unwrap();

    match outcome {
        IngestionOutcome::Processed(summary) => assert_eq!(summary.valid_count, 2),
        other => panic!("expected Processed, got {:?}", other),
    }
    assert_eq!(recorder.len(), 2);

    let current = fingerprint(sample_batch(&[GOOD_ROW_1, GOOD_ROW_2]).as_bytes());
    assert!(ingestion.is_already_processed(SOURCE, &current).await);
}

#[tokio::test]
async fn test_valid_partition_reads_back_as_records() {
    let doubles = TestDoubles::new().await.unwrap();
    let recorder = Arc::new(RecordingPublisher::new());
    let ingestion = stage(&doubles, &recorder);
    doubles.store.insert(SOURCE, sample_batch(&[GOOD_ROW_1, GOOD_ROW_2]));

    let outcome = ingestion.process_file(SOURCE).await.unwrap();
    let processed_key = outcome.summary().unwrap().processed_key.clone().unwrap();

    let validator = RecordValidator::with_current_year(2024);
    let expected: Vec<_> = [GOOD_ROW_1, GOOD_ROW_2]
        .iter()
        .map(|row| {
            let raw = helpers::fixtures::raw_row(row);
            validator.validate(&raw).unwrap()
        })
        .collect();

    let partition = doubles.store.get(&processed_key).await.unwrap();
    let mut reader = csv::Reader::from_reader(partition.body.as_slice());
    let headers = reader.headers().unwrap().clone();
    let records: Vec<_> = reader
        .records()
        .map(|row| {
            let row = row.unwrap();
            let raw = headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect();
            validator.validate(&raw).unwrap()
        })
        .collect();

    assert_eq!(records, expected);
    assert!(headers.iter().any(|h| h == "correlation_id"));
}

#[tokio::test]
async fn test_same_file_name_in_two_directories_keeps_separate_partitions() {
    let doubles = TestDoubles::new().await.unwrap();
    let recorder = Arc::new(RecordingPublisher::new());
    let ingestion = stage(&doubles, &recorder);
    let eu = "input/eu/sales.csv";
    let us = "input/us/sales.csv";
    doubles.store.insert(eu, sample_batch(&[GOOD_ROW_1]));
    doubles.store.insert(us, sample_batch(&[GOOD_ROW_2]));

    let eu_first = ingestion.process_file(eu).await.unwrap();
    let us_first = ingestion.process_file(us).await.unwrap();

    let eu_key = eu_first.summary().unwrap().processed_key.clone().unwrap();
    let us_key = us_first.summary().unwrap().processed_key.clone().unwrap();
    assert_ne!(eu_key, us_key);

    // Each pointer serves its own source's rows
    let eu_body = String::from_utf8(doubles.store.get(&eu_key).await.unwrap().body).unwrap();
    let us_body = String::from_utf8(doubles.store.get(&us_key).await.unwrap().body).unwrap();
    assert!(eu_body.contains("ORD-1001") && !eu_body.contains("ORD-1002"));
    assert!(us_body.contains("ORD-1002") && !us_body.contains("ORD-1001"));

    // Redelivery of either source is recognized
    assert!(matches!(
        ingestion.process_file(eu).await.unwrap(),
        IngestionOutcome::AlreadyProcessed(_)
    ));
    assert!(matches!(
        ingestion.process_file(us).await.unwrap(),
        IngestionOutcome::AlreadyProcessed(_)
    ));
    assert_eq!(recorder.len(), 2);
    assert_eq!(doubles.store.put_count(), 4);
}
