//! Pipeline stages
//!
//! Each stage holds only configuration and injected collaborators, and
//! finishes by handing one event to its publisher. Stages never call each
//! other.

pub mod analysis;
pub mod ingestion;
pub mod notification;

pub use analysis::{AnalysisOutcome, AnalysisStage};
pub use ingestion::{IngestionOutcome, IngestionStage, IngestionSummary};
pub use notification::{NotificationOutcome, NotificationStage};

use crate::models::RawRow;
use sdp_common::{Error, Result};

/// Parsed CSV: trimmed header names plus rows in file order
pub(crate) struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Rows keyed by header; missing trailing cells are absent, extra cells dropped
    pub fn raw_rows(&self) -> impl Iterator<Item = RawRow> + '_ {
        self.rows.iter().map(|cells| {
            self.headers
                .iter()
                .zip(cells.iter())
                .map(|(h, v)| (h.clone(), v.clone()))
                .collect()
        })
    }
}

/// Parse CSV bytes with a header row
///
/// Ragged rows are accepted so the validator can reject them with a reason.
/// Non-UTF-8 content is a deterministic [`Error::InvalidInput`].
pub(crate) fn parse_csv(bytes: &[u8]) -> Result<CsvTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| Error::InvalidInput(format!("unreadable CSV header: {}", e)))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::InvalidInput(format!("malformed CSV: {}", e)))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(CsvTable { headers, rows })
}

/// Serialize rows under a header into CSV bytes
pub(crate) fn write_csv(headers: &[String], rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
    let to_error = |e: csv::Error| Error::Internal(format!("CSV write failed: {}", e));

    writer.write_record(headers).map_err(to_error)?;
    for row in rows {
        writer.write_record(row).map_err(to_error)?;
    }
    writer
        .into_inner()
        .map_err(|e| Error::Internal(format!("CSV flush failed: {}", e)))
}
