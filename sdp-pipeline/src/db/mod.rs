//! Database access for the pipeline
//!
//! The result store lives in a SQLite file opened through
//! `sdp_common::db::init_database`; this module owns the table layout.

pub mod analysis_results;

pub use analysis_results::{CreateOutcome, ResultStore, SqliteResultStore};

use sdp_common::config::DatabaseConfig;
use sdp_common::Result;
use sqlx::SqlitePool;

/// Open the configured database and create pipeline tables
pub async fn init_database_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    let pool = sdp_common::db::init_database(&config.path, config.busy_timeout_ms).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create pipeline tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_results (
            analysis_id TEXT PRIMARY KEY,
            correlation_id TEXT NOT NULL UNIQUE,
            source_file TEXT NOT NULL,
            processed_file TEXT NOT NULL,
            records_analyzed INTEGER NOT NULL DEFAULT 0,
            raw_output TEXT NOT NULL,
            insights TEXT NOT NULL DEFAULT '[]',
            anomalies TEXT NOT NULL DEFAULT '[]',
            recommendations TEXT NOT NULL DEFAULT '[]',
            summary TEXT NOT NULL DEFAULT '',
            parse_degraded INTEGER NOT NULL DEFAULT 0,
            notified INTEGER NOT NULL DEFAULT 0,
            notified_at TEXT,
            analysis_timestamp TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analysis_results_expires_at ON analysis_results(expires_at)")
        .execute(pool)
        .await?;

    Ok(())
}
