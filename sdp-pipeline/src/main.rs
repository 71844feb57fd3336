//! sdp-pipeline - batch analysis pipeline
//!
//! `run` carries one file through ingestion, analysis and notification via
//! the event router. The single-stage commands run one stage and print the
//! events it published as wire envelopes, one JSON document per line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sdp_common::config::PipelineConfig;
use sdp_common::events::{EventEnvelope, RecordingPublisher};
use sdp_common::EventPublisher;
use sdp_pipeline::stages::{AnalysisOutcome, IngestionOutcome, NotificationOutcome};
use sdp_pipeline::{Components, Pipeline};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Command-line arguments for sdp-pipeline
#[derive(Parser, Debug)]
#[command(name = "sdp-pipeline")]
#[command(about = "Event-driven batch validation, analysis and notification pipeline")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Object store root directory
    #[arg(long, env = "SDP_ROOT")]
    root: Option<PathBuf>,

    /// Result store database file
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. "info", "sdp_pipeline=debug")
    #[arg(long, env = "SDP_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a batch file and route its events through every stage
    Run {
        /// Object key under the input prefix
        key: String,
    },
    /// Run only the ingestion stage
    Ingest { key: String },
    /// Run only the analysis stage for a valid partition
    Analyze {
        #[arg(long)]
        correlation_id: Uuid,
        /// Valid-partition object key
        #[arg(long)]
        pointer: String,
        #[arg(long)]
        source_file: Option<String>,
    },
    /// Run only the notification stage for an analysis result
    Notify {
        #[arg(long)]
        analysis_id: String,
        #[arg(long)]
        correlation_id: Option<Uuid>,
    },
    /// Delete analysis results past their TTL
    PurgeExpired,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = PipelineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(root) = args.root {
        config.storage.root = root;
    }
    if let Some(database) = args.database {
        config.database.path = database;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate().context("Invalid configuration")?;

    sdp_common::logging::init_tracing(&config.logging);

    info!("Starting sdp-pipeline {}", env!("CARGO_PKG_VERSION"));
    info!("Object store: {}", config.storage.root.display());
    info!("Database: {}", config.database.path.display());

    let components = Components::from_config(&config)
        .await
        .context("Failed to initialize pipeline components")?;

    match args.command {
        Command::Run { key } => {
            let pipeline = Pipeline::new(&config, components)?;
            let (outcome, report) = pipeline.run_file(&key).await?;
            info!(
                handled = report.handled,
                failed = report.failed,
                unrouted = report.unrouted,
                "Pipeline run finished"
            );
            print_ingestion(&outcome);
            if report.failed > 0 {
                bail!("{} downstream stage(s) failed for {}", report.failed, key);
            }
        }
        Command::Ingest { key } => {
            let (pipeline, recorder) = single_stage(&config, components)?;
            let outcome = pipeline.ingestion.process_file(&key).await?;
            print_ingestion(&outcome);
            print_events(&recorder, &config)?;
        }
        Command::Analyze {
            correlation_id,
            pointer,
            source_file,
        } => {
            let (pipeline, recorder) = single_stage(&config, components)?;
            let outcome = pipeline
                .analysis
                .analyze(correlation_id, &pointer, source_file.as_deref())
                .await?;
            match &outcome {
                AnalysisOutcome::Completed { analysis_id, parse_degraded } => {
                    info!(%analysis_id, parse_degraded, "Analysis stored")
                }
                AnalysisOutcome::Duplicate { analysis_id } => info!(%analysis_id, "Analysis already existed"),
                AnalysisOutcome::NoData => info!("No valid records; nothing analyzed"),
            }
            print_events(&recorder, &config)?;
        }
        Command::Notify {
            analysis_id,
            correlation_id,
        } => {
            let (pipeline, _recorder) = single_stage(&config, components)?;
            match pipeline.notification.notify(&analysis_id, correlation_id).await? {
                NotificationOutcome::Sent { delivery_id, subject } => {
                    info!(%delivery_id, %subject, "Notification sent")
                }
                NotificationOutcome::AlreadyNotified => info!("Result already notified"),
            }
        }
        Command::PurgeExpired => {
            let purged = components.results.purge_expired(sdp_common::time::now()).await?;
            info!(purged, "Expired analysis results deleted");
        }
    }

    Ok(())
}

/// Pipeline whose stages publish into a recorder instead of the bus
fn single_stage(config: &PipelineConfig, components: Components) -> Result<(Pipeline, Arc<RecordingPublisher>)> {
    let recorder = Arc::new(RecordingPublisher::new());
    let publisher: Arc<dyn EventPublisher> = recorder.clone();
    let bus = sdp_common::EventBus::new(config.events.bus_capacity);
    let pipeline = Pipeline::with_publisher(config, components, bus, publisher)?;
    Ok((pipeline, recorder))
}

fn print_ingestion(outcome: &IngestionOutcome) {
    match outcome {
        IngestionOutcome::Processed(summary) => info!(
            correlation_id = %summary.correlation_id,
            valid = summary.valid_count,
            invalid = summary.invalid_count,
            "Ingestion processed file"
        ),
        IngestionOutcome::AlreadyProcessed(summary) => info!(
            correlation_id = %summary.correlation_id,
            valid = summary.valid_count,
            invalid = summary.invalid_count,
            "Ingestion skipped: already processed"
        ),
        IngestionOutcome::Skipped { reason } => info!(%reason, "Ingestion skipped"),
    }
}

fn print_events(recorder: &RecordingPublisher, config: &PipelineConfig) -> Result<()> {
    for event in recorder.take() {
        let envelope = EventEnvelope::wrap(&event, &config.events.source)?;
        println!("{}", serde_json::to_string(&envelope)?);
    }
    Ok(())
}
