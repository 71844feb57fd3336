//! Analysis Result persistence
//!
//! Consistency comes from conditional writes, never client-side locks:
//! - `create` relies on `UNIQUE(correlation_id)`; a losing writer gets the
//!   winner's identifier back
//! - `mark_notified` only flips rows where `notified = 0`

use crate::models::AnalysisResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdp_common::{retry_with_backoff, Error, Result, RetryPolicy};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

/// Result of a conditional create
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(String),
    /// A result for this correlation id already existed
    Existing(String),
}

impl CreateOutcome {
    pub fn analysis_id(&self) -> &str {
        match self {
            CreateOutcome::Created(id) | CreateOutcome::Existing(id) => id,
        }
    }
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert unless a result for the same correlation id exists
    async fn create(&self, result: &AnalysisResult) -> Result<CreateOutcome>;

    async fn get(&self, analysis_id: &str) -> Result<Option<AnalysisResult>>;

    async fn find_by_correlation(&self, correlation_id: Uuid) -> Result<Option<AnalysisResult>>;

    /// Flip notified false→true; `Ok(false)` if it was already true,
    /// [`Error::NotFound`] if the result does not exist
    async fn mark_notified(&self, analysis_id: &str) -> Result<bool>;

    /// Delete results whose TTL marker is at or before `now`
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// SQLite-backed result store
#[derive(Clone)]
pub struct SqliteResultStore {
    pool: SqlitePool,
    retry: RetryPolicy,
}

const SELECT_COLUMNS: &str = r#"
    SELECT analysis_id, correlation_id, source_file, processed_file, records_analyzed,
           raw_output, insights, anomalies, recommendations, summary, parse_degraded,
           notified, notified_at, analysis_timestamp, expires_at
    FROM analysis_results
"#;

impl SqliteResultStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::new(3, 50, 500),
        }
    }

    /// Override the policy used for lock contention on writes
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<AnalysisResult>> {
        let sql = format!("{} WHERE {} = ?", SELECT_COLUMNS, clause);
        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;
        row.map(|r| row_to_result(&r)).transpose()
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", raw, e)))
}

fn row_to_result(row: &SqliteRow) -> Result<AnalysisResult> {
    let correlation_id: String = row.get("correlation_id");
    let insights: String = row.get("insights");
    let anomalies: String = row.get("anomalies");
    let recommendations: String = row.get("recommendations");
    let notified_at: Option<String> = row.get("notified_at");
    let analysis_timestamp: String = row.get("analysis_timestamp");
    let records_analyzed: i64 = row.get("records_analyzed");

    Ok(AnalysisResult {
        analysis_id: row.get("analysis_id"),
        correlation_id: sdp_common::uuid_utils::parse(&correlation_id)?,
        source_file: row.get("source_file"),
        processed_file: row.get("processed_file"),
        records_analyzed: records_analyzed.max(0) as usize,
        raw_output: row.get("raw_output"),
        insights: serde_json::from_str(&insights)?,
        anomalies: serde_json::from_str(&anomalies)?,
        recommendations: serde_json::from_str(&recommendations)?,
        summary: row.get("summary"),
        parse_degraded: row.get::<i64, _>("parse_degraded") != 0,
        notified: row.get::<i64, _>("notified") != 0,
        notified_at: notified_at.as_deref().map(parse_timestamp).transpose()?,
        analysis_timestamp: parse_timestamp(&analysis_timestamp)?,
        expires_at: row.get("expires_at"),
    })
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn create(&self, result: &AnalysisResult) -> Result<CreateOutcome> {
        // Prepare all data before touching the pool
        let correlation_id = result.correlation_id.to_string();
        let insights = serde_json::to_string(&result.insights)?;
        let anomalies = serde_json::to_string(&result.anomalies)?;
        let recommendations = serde_json::to_string(&result.recommendations)?;
        let analysis_timestamp = result.analysis_timestamp.to_rfc3339();
        let notified_at = result.notified_at.map(|dt| dt.to_rfc3339());

        let inserted = retry_with_backoff("create analysis result", &self.retry, || async {
            let outcome = sqlx::query(
                r#"
                INSERT INTO analysis_results (
                    analysis_id, correlation_id, source_file, processed_file, records_analyzed,
                    raw_output, insights, anomalies, recommendations, summary, parse_degraded,
                    notified, notified_at, analysis_timestamp, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&result.analysis_id)
            .bind(&correlation_id)
            .bind(&result.source_file)
            .bind(&result.processed_file)
            .bind(result.records_analyzed as i64)
            .bind(&result.raw_output)
            .bind(&insights)
            .bind(&anomalies)
            .bind(&recommendations)
            .bind(&result.summary)
            .bind(result.parse_degraded as i64)
            .bind(result.notified as i64)
            .bind(&notified_at)
            .bind(&analysis_timestamp)
            .bind(result.expires_at)
            .execute(&self.pool)
            .await?;
            Ok(outcome.rows_affected() > 0)
        })
        .await?;

        if inserted {
            return Ok(CreateOutcome::Created(result.analysis_id.clone()));
        }

        match self.find_by_correlation(result.correlation_id).await? {
            Some(existing) => {
                tracing::info!(
                    correlation_id = %result.correlation_id,
                    analysis_id = %existing.analysis_id,
                    "Analysis result already exists for correlation"
                );
                Ok(CreateOutcome::Existing(existing.analysis_id))
            }
            None => Err(Error::Internal(format!(
                "analysis id {} already taken by another correlation",
                result.analysis_id
            ))),
        }
    }

    async fn get(&self, analysis_id: &str) -> Result<Option<AnalysisResult>> {
        self.fetch_one_where("analysis_id", analysis_id).await
    }

    async fn find_by_correlation(&self, correlation_id: Uuid) -> Result<Option<AnalysisResult>> {
        self.fetch_one_where("correlation_id", &correlation_id.to_string()).await
    }

    async fn mark_notified(&self, analysis_id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();

        let flipped = retry_with_backoff("mark analysis notified", &self.retry, || async {
            let outcome = sqlx::query(
                "UPDATE analysis_results SET notified = 1, notified_at = ? WHERE analysis_id = ? AND notified = 0",
            )
            .bind(&now)
            .bind(analysis_id)
            .execute(&self.pool)
            .await?;
            Ok(outcome.rows_affected() > 0)
        })
        .await?;

        if flipped {
            return Ok(true);
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM analysis_results WHERE analysis_id = ?")
            .bind(analysis_id)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(Error::NotFound(format!("analysis result {}", analysis_id))),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let outcome = sqlx::query("DELETE FROM analysis_results WHERE expires_at <= ?")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(outcome.rows_affected())
    }
}
