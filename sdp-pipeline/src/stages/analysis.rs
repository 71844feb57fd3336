//! Analysis Stage
//!
//! Consumes a valid partition, asks the generative model for insights,
//! anomalies and recommendations, persists one Analysis Result per
//! correlation id and publishes `AnalysisComplete`.
//!
//! **Algorithm:**
//! 1. Existing result for the correlation id → re-publish it, no model call
//! 2. Download and decode the valid partition (empty → `NoData`, stop)
//! 3. Build the prompt (bounded record count)
//! 4. Invoke the model with retry; exhaustion aborts the stage
//! 5. Parse the reply, degrading to raw text on failure
//! 6. Conditional create, then publish

use super::parse_csv;
use crate::db::{CreateOutcome, ResultStore};
use crate::error::{StageError, StageResult};
use crate::models::{AnalysisResult, ParsedAnalysis, Record};
use crate::services::{GenerativeModel, Prompt};
use crate::storage::ObjectStore;
use crate::validators::RecordValidator;
use sdp_common::config::{ModelConfig, ResultsConfig};
use sdp_common::events::AnalysisCompleteDetail;
use sdp_common::{retry_with_backoff, Error, EventPublisher, RetryPolicy, StageEvent};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const STAGE: &str = "analysis";

const SYSTEM_INSTRUCTION: &str = "You are a data analysis assistant. Provide insights, detect anomalies, \
and suggest recommendations based on the provided data.";

const TASK_TEMPLATE: &str = r#"Analyze the following smartphone sales dataset and provide insights in JSON format.

The dataset contains sales records with fields such as brand, region, and price. Your job is to:
- Detect market trends (e.g., top brands, popular regions)
- Identify pricing anomalies or irregularities
- Suggest strategic recommendations (e.g., pricing, marketing, inventory)
- Summarize key findings

Here is the dataset:
{records}

Please respond ONLY with a JSON object in the following format:

{
  "insights": [
    {"type": "market_trend", "description": "Description of the insight", "confidence": "high/medium/low"}
  ],
  "anomalies": [
    {"type": "price_anomaly", "description": "Description of the anomaly", "severity": "high/medium/low"}
  ],
  "recommendations": [
    {"category": "pricing/inventory/marketing", "action": "Recommended action", "priority": "high/medium/low"}
  ],
  "summary": "Brief summary of key findings"
}

Focus on:
- Unusual or extreme prices
- Brand and region performance
- Business opportunities or risks
- Unexpected patterns or gaps in the data

Avoid explaining the JSON format. Only return the structured output."#;

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// New result stored and `AnalysisComplete` published
    Completed { analysis_id: String, parse_degraded: bool },
    /// A result already existed for this correlation id; event re-published
    Duplicate { analysis_id: String },
    /// Valid partition held no records; nothing stored or published
    NoData,
}

impl AnalysisOutcome {
    pub fn analysis_id(&self) -> Option<&str> {
        match self {
            AnalysisOutcome::Completed { analysis_id, .. } | AnalysisOutcome::Duplicate { analysis_id } => {
                Some(analysis_id)
            }
            AnalysisOutcome::NoData => None,
        }
    }
}

pub struct AnalysisStage {
    store: Arc<dyn ObjectStore>,
    results: Arc<dyn ResultStore>,
    model: Arc<dyn GenerativeModel>,
    publisher: Arc<dyn EventPublisher>,
    max_prompt_records: usize,
    retry: RetryPolicy,
    results_config: ResultsConfig,
    validator: RecordValidator,
}

impl AnalysisStage {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        results: Arc<dyn ResultStore>,
        model: Arc<dyn GenerativeModel>,
        publisher: Arc<dyn EventPublisher>,
        model_config: &ModelConfig,
        retry: RetryPolicy,
        results_config: ResultsConfig,
    ) -> Self {
        Self {
            store,
            results,
            model,
            publisher,
            max_prompt_records: model_config.max_prompt_records,
            retry,
            results_config,
            validator: RecordValidator::new(),
        }
    }

    pub fn with_validator(mut self, validator: RecordValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Fetch a valid partition and decode its records
    ///
    /// Rows that no longer validate are dropped with a warning.
    pub async fn download_valid_partition(&self, location: &str) -> StageResult<Vec<Record>> {
        let object = retry_with_backoff(&format!("fetch {}", location), &self.retry, || {
            self.store.get(location)
        })
        .await
        .map_err(|e| match e {
            Error::NotFound(what) => StageError::NotFound(what),
            other => StageError::fatal(STAGE, None, other.to_string()),
        })?;

        let table = parse_csv(&object.body)?;
        let mut records = Vec::with_capacity(table.rows.len());
        for (index, raw) in table.raw_rows().enumerate() {
            match self.validator.validate(&raw) {
                Ok(record) => records.push(record),
                Err(reason) => warn!(
                    object_key = %location,
                    row_number = index + 2,
                    %reason,
                    "Dropping row from valid partition"
                ),
            }
        }
        Ok(records)
    }

    /// Fixed system instruction, fixed task template, serialized records
    pub fn build_prompt(&self, records: &[Record]) -> StageResult<Prompt> {
        let included = if records.len() > self.max_prompt_records {
            warn!(
                total = records.len(),
                included = self.max_prompt_records,
                "Truncating records for prompt"
            );
            &records[..self.max_prompt_records]
        } else {
            records
        };

        let records_json = serde_json::to_string_pretty(included).map_err(Error::from)?;
        Ok(Prompt {
            system: SYSTEM_INSTRUCTION.to_string(),
            user: TASK_TEMPLATE.replace("{records}", &records_json),
        })
    }

    /// Invoke the model, retrying transient failures
    pub async fn invoke_model(&self, correlation_id: Uuid, prompt: &Prompt) -> StageResult<String> {
        retry_with_backoff("invoke model", &self.retry, || self.model.invoke(prompt))
            .await
            .map_err(|e| {
                tracing::error!(
                    correlation_id = %correlation_id,
                    category = e.category(),
                    error = %e,
                    "Model invocation failed"
                );
                StageError::fatal(STAGE, Some(correlation_id), e.to_string())
            })
    }

    /// Handle one `ProcessingComplete` delivery
    pub async fn analyze(
        &self,
        correlation_id: Uuid,
        pointer: &str,
        source_file: Option<&str>,
    ) -> StageResult<AnalysisOutcome> {
        if let Some(existing) = self.results.find_by_correlation(correlation_id).await? {
            info!(
                correlation_id = %correlation_id,
                analysis_id = %existing.analysis_id,
                "Analysis already exists for correlation, re-publishing"
            );
            self.publish(&existing).await?;
            return Ok(AnalysisOutcome::Duplicate {
                analysis_id: existing.analysis_id,
            });
        }

        let records = self.download_valid_partition(pointer).await?;
        if records.is_empty() {
            warn!(correlation_id = %correlation_id, object_key = %pointer, "No valid records to analyze");
            return Ok(AnalysisOutcome::NoData);
        }

        let prompt = self.build_prompt(&records)?;
        info!(correlation_id = %correlation_id, records = records.len(), "Calling generative model");
        let raw_output = self.invoke_model(correlation_id, &prompt).await?;

        let parsed = parse_response(&raw_output);
        if parsed.parse_degraded {
            warn!(
                correlation_id = %correlation_id,
                response_len = raw_output.len(),
                "Model reply was not valid JSON, storing raw text as summary"
            );
        }

        let now = sdp_common::time::now();
        let result = AnalysisResult {
            analysis_id: AnalysisResult::make_id(now, &correlation_id),
            correlation_id,
            source_file: source_file.map(str::to_string).unwrap_or_default(),
            processed_file: pointer.to_string(),
            records_analyzed: records.len(),
            raw_output,
            insights: parsed.insights,
            anomalies: parsed.anomalies,
            recommendations: parsed.recommendations,
            summary: parsed.summary,
            parse_degraded: parsed.parse_degraded,
            notified: false,
            notified_at: None,
            analysis_timestamp: now,
            expires_at: sdp_common::time::expires_at(now, self.results_config.ttl_days).timestamp(),
        };

        let stored = match self.results.create(&result).await? {
            CreateOutcome::Created(_) => result,
            CreateOutcome::Existing(id) => {
                info!(correlation_id = %correlation_id, analysis_id = %id, "Lost creation race, using existing result");
                let existing = self
                    .results
                    .get(&id)
                    .await?
                    .ok_or_else(|| StageError::NotFound(format!("analysis result {}", id)))?;
                self.publish(&existing).await?;
                return Ok(AnalysisOutcome::Duplicate { analysis_id: id });
            }
        };

        self.publish(&stored).await?;

        info!(
            correlation_id = %correlation_id,
            analysis_id = %stored.analysis_id,
            insights = stored.insights.len(),
            anomalies = stored.anomalies.len(),
            "Analysis complete"
        );

        Ok(AnalysisOutcome::Completed {
            analysis_id: stored.analysis_id,
            parse_degraded: stored.parse_degraded,
        })
    }

    async fn publish(&self, result: &AnalysisResult) -> StageResult<()> {
        let event = StageEvent::AnalysisComplete {
            correlation_id: result.correlation_id,
            detail: AnalysisCompleteDetail {
                analysis_id: result.analysis_id.clone(),
                insights_count: result.insights.len(),
                anomalies_count: result.anomalies.len(),
                high_value_anomalies: result.high_value_anomalies(),
                notification_required: result.notification_required(),
            },
        };
        self.publisher.publish(event).await?;
        Ok(())
    }
}

/// Extract the JSON object between the first `{` and the last `}`
///
/// Anything that does not deserialize yields [`ParsedAnalysis::degraded`].
pub fn parse_response(raw: &str) -> ParsedAnalysis {
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return ParsedAnalysis::degraded(raw);
    };
    if end < start {
        return ParsedAnalysis::degraded(raw);
    }

    match serde_json::from_str::<ParsedAnalysis>(&raw[start..=end]) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(error = %e, "Model reply JSON did not match expected shape");
            ParsedAnalysis::degraded(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Level, Region};
    use chrono::NaiveDate;

    fn record(n: usize) -> Record {
        Record {
            order_id: format!("ORD-{}", n),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            model: "Pixel 8".into(),
            brand: "Google".into(),
            release_year: None,
            price: 699.0,
            region: Region::Asia,
            customer_review: None,
            ram: None,
            storage: None,
            color: None,
        }
    }

    #[test]
    fn test_parse_response_extracts_embedded_json() {
        let raw = r#"Here you go:
        {"insights":[{"type":"market_trend","description":"Samsung leads","confidence":"high"}],
         "anomalies":[],"recommendations":[{"category":"pricing","action":"Cut","priority":"low"}],
         "summary":"Fine"}
        Thanks!"#;

        let parsed = parse_response(raw);
        assert!(!parsed.parse_degraded);
        assert_eq!(parsed.insights.len(), 1);
        assert_eq!(parsed.insights[0].confidence, Level::High);
        assert_eq!(parsed.recommendations[0].priority, Level::Low);
        assert_eq!(parsed.summary, "Fine");
    }

    #[test]
    fn test_parse_response_degrades_on_plain_text() {
        let parsed = parse_response("The data looks fine overall.");
        assert!(parsed.parse_degraded);
        assert_eq!(parsed.summary, "The data looks fine overall.");
        assert!(parsed.insights.is_empty());
        assert!(parsed.anomalies.is_empty());
        assert!(parsed.recommendations.is_empty());
    }

    #[test]
    fn test_parse_response_degrades_on_broken_json() {
        let raw = "} oops {\"insights\": [";
        assert!(parse_response(raw).parse_degraded);
        assert!(parse_response("{\"insights\": \"many\"}").parse_degraded);
    }

    #[test]
    fn test_build_prompt_truncates() {
        let stage = AnalysisStage::new(
            Arc::new(crate::storage::InMemoryObjectStore::new()),
            Arc::new(NoResults),
            Arc::new(crate::services::ScriptedModel::new()),
            Arc::new(sdp_common::events::RecordingPublisher::new()),
            &ModelConfig {
                max_prompt_records: 2,
                ..ModelConfig::default()
            },
            RetryPolicy::no_retry(),
            ResultsConfig::default(),
        );

        let prompt = stage.build_prompt(&[record(1), record(2), record(3)]).unwrap();
        assert!(prompt.user.contains("ORD-2"));
        assert!(!prompt.user.contains("ORD-3"));
        assert!(prompt.user.contains("\"region\": \"Asia\""));
        assert_eq!(prompt.system, SYSTEM_INSTRUCTION);
    }

    struct NoResults;

    #[async_trait::async_trait]
    impl ResultStore for NoResults {
        async fn create(&self, result: &AnalysisResult) -> sdp_common::Result<CreateOutcome> {
            Ok(CreateOutcome::Created(result.analysis_id.clone()))
        }
        async fn get(&self, _: &str) -> sdp_common::Result<Option<AnalysisResult>> {
            Ok(None)
        }
        async fn find_by_correlation(&self, _: Uuid) -> sdp_common::Result<Option<AnalysisResult>> {
            Ok(None)
        }
        async fn mark_notified(&self, _: &str) -> sdp_common::Result<bool> {
            Ok(true)
        }
        async fn purge_expired(&self, _: chrono::DateTime<chrono::Utc>) -> sdp_common::Result<u64> {
            Ok(0)
        }
    }
}
