//! Wire envelope for stage events
//!
//! An external event bus sees `{source, detail-type, time, detail}` where
//! `detail` holds `correlationId`, `pointer` and the stage-specific counts.

use super::{AnalysisCompleteDetail, EventKind, ProcessingCompleteDetail, StageEvent};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default `source` attribute for events emitted by this pipeline
pub const EVENT_SOURCE: &str = "sdp.data-processing";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub time: DateTime<Utc>,
    pub detail: Value,
}

impl EventEnvelope {
    /// Wrap a stage event for transmission
    pub fn wrap(event: &StageEvent, source: &str) -> Result<Self> {
        let mut detail = match event {
            StageEvent::ProcessingComplete { detail, .. } => serde_json::to_value(detail)?,
            StageEvent::AnalysisComplete { detail, .. } => serde_json::to_value(detail)?,
        };

        if let Value::Object(map) = &mut detail {
            map.insert("correlationId".into(), Value::String(event.correlation_id().to_string()));
            map.insert("pointer".into(), Value::String(event.pointer().to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            detail_type: event.kind().detail_type().to_string(),
            time: Utc::now(),
            detail,
        })
    }

    /// Recover the stage event from a received envelope
    ///
    /// Only `correlationId` and `pointer` are mandatory; the count fields
    /// default to zero so that a hand-written trigger still routes.
    pub fn unwrap_event(&self) -> Result<StageEvent> {
        let kind: EventKind = self.detail_type.parse()?;

        let correlation_id = self
            .detail
            .get("correlationId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("event detail missing correlationId".into()))?;
        let correlation_id = Uuid::parse_str(correlation_id)
            .map_err(|e| Error::InvalidInput(format!("invalid correlationId: {}", e)))?;

        let pointer = self
            .detail
            .get("pointer")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::InvalidInput("event detail missing pointer".into()))?
            .to_string();

        let count = |field: &str| self.detail.get(field).and_then(Value::as_u64).unwrap_or(0) as usize;
        let text = |field: &str| self.detail.get(field).and_then(Value::as_str).map(str::to_string);

        let event = match kind {
            EventKind::ProcessingComplete => {
                let valid_records = count("validRecords");
                let invalid_records = count("invalidRecords");
                StageEvent::ProcessingComplete {
                    correlation_id,
                    detail: ProcessingCompleteDetail {
                        source_file: text("sourceFile").unwrap_or_default(),
                        processed_file: pointer,
                        rejected_file: text("rejectedFile"),
                        valid_records,
                        invalid_records,
                        data_quality_score: ProcessingCompleteDetail::quality_score(valid_records, invalid_records),
                    },
                }
            }
            EventKind::AnalysisComplete => StageEvent::AnalysisComplete {
                correlation_id,
                detail: AnalysisCompleteDetail {
                    analysis_id: pointer,
                    insights_count: count("insightsCount"),
                    anomalies_count: count("anomaliesCount"),
                    high_value_anomalies: count("highValueAnomalies"),
                    notification_required: self
                        .detail
                        .get("notificationRequired")
                        .and_then(Value::as_bool)
                        .unwrap_or(true),
                },
            },
        };

        Ok(event)
    }
}
