//! Pipeline assembly
//!
//! Builds the collaborators named by a [`PipelineConfig`], constructs the
//! three stages around them and registers the two event routes:
//!
//! | event                | handler      |
//! |----------------------|--------------|
//! | `ProcessingComplete` | analysis     |
//! | `AnalysisComplete`   | notification |

use crate::db::{ResultStore, SqliteResultStore};
use crate::error::StageResult;
use crate::router::{DrainReport, EventRouter};
use crate::services::{GenerativeModel, HttpModelClient, NotificationChannel, OutboxChannel, WebhookChannel};
use crate::stages::{AnalysisStage, IngestionOutcome, IngestionStage, NotificationStage};
use crate::storage::{FsObjectStore, ObjectStore};
use sdp_common::config::PipelineConfig;
use sdp_common::{Error, EventBus, EventKind, EventPublisher, StageEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared collaborators, swappable in tests
#[derive(Clone)]
pub struct Components {
    pub store: Arc<dyn ObjectStore>,
    pub results: Arc<dyn ResultStore>,
    pub model: Arc<dyn GenerativeModel>,
    pub channel: Arc<dyn NotificationChannel>,
}

impl Components {
    /// Production collaborators from configuration
    pub async fn from_config(config: &PipelineConfig) -> sdp_common::Result<Self> {
        let pool = crate::db::init_database_pool(&config.database).await?;
        let model = HttpModelClient::new(config.model.clone()).map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            store: Arc::new(FsObjectStore::new(&config.storage.root)),
            results: Arc::new(SqliteResultStore::new(pool)),
            model: Arc::new(model),
            channel: notification_channel(config)?,
        })
    }
}

/// Webhook when a URL is configured, otherwise the outbox directory
pub fn notification_channel(config: &PipelineConfig) -> sdp_common::Result<Arc<dyn NotificationChannel>> {
    if let Some(url) = &config.notification.webhook_url {
        return Ok(Arc::new(WebhookChannel::new(url.clone(), &config.notification)?));
    }
    let dir = config
        .notification
        .outbox_dir
        .clone()
        .unwrap_or_else(|| config.storage.root.join("outbox"));
    Ok(Arc::new(OutboxChannel::new(dir, &config.notification)))
}

pub struct Pipeline {
    pub bus: EventBus,
    pub ingestion: Arc<IngestionStage>,
    pub analysis: Arc<AnalysisStage>,
    pub notification: Arc<NotificationStage>,
    pub router: Arc<EventRouter>,
}

impl Pipeline {
    /// Wire stages to the bus and the router
    pub fn new(config: &PipelineConfig, components: Components) -> sdp_common::Result<Self> {
        let bus = EventBus::new(config.events.bus_capacity);
        let publisher: Arc<dyn EventPublisher> = Arc::new(bus.clone());
        Self::with_publisher(config, components, bus, publisher)
    }

    /// Same as [`Pipeline::new`] but stages publish through `publisher`
    pub fn with_publisher(
        config: &PipelineConfig,
        components: Components,
        bus: EventBus,
        publisher: Arc<dyn EventPublisher>,
    ) -> sdp_common::Result<Self> {
        let ingestion = Arc::new(IngestionStage::new(
            components.store.clone(),
            publisher.clone(),
            config.storage.clone(),
            config.retry.clone(),
        ));
        let analysis = Arc::new(AnalysisStage::new(
            components.store.clone(),
            components.results.clone(),
            components.model.clone(),
            publisher,
            &config.model,
            config.retry.clone(),
            config.results.clone(),
        ));
        let notification = Arc::new(NotificationStage::new(
            components.results.clone(),
            components.channel.clone(),
            config.notification.subject_prefix.clone(),
            config.retry.clone(),
        ));

        let mut router = EventRouter::new();
        router.subscribe(EventKind::ProcessingComplete, analysis.clone())?;
        router.subscribe(EventKind::AnalysisComplete, notification.clone())?;

        Ok(Self {
            bus,
            ingestion,
            analysis,
            notification,
            router: Arc::new(router),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.bus.subscribe()
    }

    /// Ingest one file and carry its events through every stage
    pub async fn run_file(&self, source_key: &str) -> StageResult<(IngestionOutcome, DrainReport)> {
        let mut rx = self.subscribe();
        let outcome = self.ingestion.process_file(source_key).await?;
        let report = self.router.drain(&mut rx).await;
        Ok((outcome, report))
    }
}
