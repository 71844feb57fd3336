//! Stage events for the pipeline event system
//!
//! Provides the stage-complete event definitions, the `EventPublisher`
//! capability injected into each stage, and the in-process `EventBus`.

mod envelope;

pub use envelope::{EventEnvelope, EVENT_SOURCE};

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kind of stage-complete event, used as the router's dispatch key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ProcessingComplete,
    AnalysisComplete,
}

impl EventKind {
    /// Wire `detail-type` string
    pub fn detail_type(&self) -> &'static str {
        match self {
            EventKind::ProcessingComplete => "Processing Complete",
            EventKind::AnalysisComplete => "Analysis Complete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.detail_type())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Processing Complete" | "ProcessingComplete" => Ok(EventKind::ProcessingComplete),
            "Analysis Complete" | "AnalysisComplete" => Ok(EventKind::AnalysisComplete),
            other => Err(Error::InvalidInput(format!("unknown detail-type: {}", other))),
        }
    }
}

/// Detail carried by a `ProcessingComplete` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingCompleteDetail {
    /// Source object that triggered the run
    pub source_file: String,
    /// Valid-partition location (the event pointer)
    pub processed_file: String,
    /// Rejected-partition location
    pub rejected_file: Option<String>,
    pub valid_records: usize,
    pub invalid_records: usize,
    /// Percentage of valid rows, two decimals
    pub data_quality_score: f64,
}

impl ProcessingCompleteDetail {
    /// Percentage of valid rows rounded to two decimals (0 for an empty file)
    pub fn quality_score(valid: usize, invalid: usize) -> f64 {
        let total = valid + invalid;
        if total == 0 {
            return 0.0;
        }
        ((valid as f64 / total as f64) * 10_000.0).round() / 100.0
    }
}

/// Detail carried by an `AnalysisComplete` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisCompleteDetail {
    /// Analysis Result key (the event pointer)
    pub analysis_id: String,
    pub insights_count: usize,
    pub anomalies_count: usize,
    pub high_value_anomalies: usize,
    pub notification_required: bool,
}

/// Stage-complete event
///
/// Each variant carries the correlation identifier threading one pipeline
/// run and a pointer to the artifact the next stage consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StageEvent {
    /// Ingestion finished; pointer is the valid-partition key
    ProcessingComplete {
        correlation_id: Uuid,
        detail: ProcessingCompleteDetail,
    },

    /// Analysis finished; pointer is the analysis identifier
    AnalysisComplete {
        correlation_id: Uuid,
        detail: AnalysisCompleteDetail,
    },
}

impl StageEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StageEvent::ProcessingComplete { .. } => EventKind::ProcessingComplete,
            StageEvent::AnalysisComplete { .. } => EventKind::AnalysisComplete,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        match self {
            StageEvent::ProcessingComplete { correlation_id, .. }
            | StageEvent::AnalysisComplete { correlation_id, .. } => *correlation_id,
        }
    }

    /// Storage key (ProcessingComplete) or analysis identifier (AnalysisComplete)
    pub fn pointer(&self) -> &str {
        match self {
            StageEvent::ProcessingComplete { detail, .. } => &detail.processed_file,
            StageEvent::AnalysisComplete { detail, .. } => &detail.analysis_id,
        }
    }
}

/// Publish capability injected into each stage
///
/// Stages never call each other; they hand their completion event to a
/// publisher and return.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: StageEvent) -> Result<()>;
}

/// In-process event bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use sdp_common::events::EventBus;
///
/// let event_bus = EventBus::new(100);
/// let _rx = event_bus.subscribe();
/// assert_eq!(event_bus.subscriber_count(), 1);
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StageEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: StageEvent) -> std::result::Result<usize, broadcast::error::SendError<StageEvent>> {
        self.tx.send(event)
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    /// A stage-complete event with nobody listening is a lost pipeline
    /// advance, so it is reported instead of dropped.
    async fn publish(&self, event: StageEvent) -> Result<()> {
        let kind = event.kind();
        let correlation_id = event.correlation_id();
        match self.emit(event) {
            Ok(receivers) => {
                tracing::debug!(%correlation_id, event = %kind, receivers, "Event published");
                Ok(())
            }
            Err(_) => Err(Error::Internal(format!(
                "no subscribers for {} event (correlation {})",
                kind, correlation_id
            ))),
        }
    }
}

/// Publisher that keeps every event in memory
///
/// Used by tests and by single-stage CLI invocations that print the emitted
/// envelopes instead of routing them.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<StageEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events published so far
    pub fn events(&self) -> Vec<StageEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Remove and return all events published so far
    pub fn take(&self) -> Vec<StageEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: StageEvent) -> Result<()> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
        Ok(())
    }
}
