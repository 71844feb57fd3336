//! Test Helper Utilities
//!
//! Shared fixtures and wiring for sdp-pipeline integration tests

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_server;

pub use fixtures::{sample_batch, BATCH_HEADER, GOOD_ROW_1, GOOD_ROW_2, MISSING_PRICE_ROW, MODEL_REPLY};
pub use mock_server::{spawn_mock, MockReply, MockServer};

use sdp_common::config::PipelineConfig;
use sdp_common::RetryPolicy;
use sdp_pipeline::db::SqliteResultStore;
use sdp_pipeline::services::{RecordingChannel, ScriptedModel};
use sdp_pipeline::storage::InMemoryObjectStore;
use sdp_pipeline::Components;
use std::path::Path;
use std::sync::Arc;

/// Retry policy with millisecond backoff
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, 1, 4)
}

/// Default configuration rooted at `root`, with fast retries
pub fn test_config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.storage.root = root.join("objects");
    config.database.path = root.join("sdp.db");
    config.retry = fast_retry();
    config
}

/// In-memory collaborators plus handles for inspecting them
pub struct TestDoubles {
    pub store: Arc<InMemoryObjectStore>,
    pub results: Arc<SqliteResultStore>,
    pub model: Arc<ScriptedModel>,
    pub channel: Arc<RecordingChannel>,
}

impl TestDoubles {
    pub async fn new() -> anyhow::Result<Self> {
        let pool = sdp_common::db::init_memory_database().await?;
        sdp_pipeline::db::init_tables(&pool).await?;

        Ok(Self {
            store: Arc::new(InMemoryObjectStore::new()),
            results: Arc::new(SqliteResultStore::new(pool).with_retry(fast_retry())),
            model: Arc::new(ScriptedModel::new()),
            channel: Arc::new(RecordingChannel::new()),
        })
    }

    pub fn components(&self) -> Components {
        Components {
            store: self.store.clone(),
            results: self.results.clone(),
            model: self.model.clone(),
            channel: self.channel.clone(),
        }
    }
}
