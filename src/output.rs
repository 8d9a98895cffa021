//! Hand-off files for the document writer.
//!
//! Each successful row becomes `row-NNNN.png`, where `NNNN` is the
//! spreadsheet row number. `report.json` lists every row in input order.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::batch::{BatchReport, ProcessingOutcome, SkipReason};
use crate::input::sheet_row_number;
use crate::normalize::DecodeError;
use crate::resolver::{StrategyAttempt, StrategyKind};

/// Report file name inside the output directory.
pub const REPORT_FILE_NAME: &str = "report.json";

/// Errors writing hand-off files.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Creating the directory or writing a file failed.
    #[error("cannot write '{path}': {source}")]
    Io {
        /// The path being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A thumbnail could not be PNG-encoded.
    #[error("cannot encode thumbnail for row {row_index}: {source}")]
    Encode {
        /// Row whose bitmap failed.
        row_index: usize,
        /// Encoder error.
        #[source]
        source: DecodeError,
    },

    /// The report could not be serialized.
    #[error("cannot serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-row status in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RowStatus {
    /// Thumbnail written.
    Success,
    /// Blank row.
    Empty,
    /// Not processed because the batch was cancelled.
    Cancelled,
    /// Processing failed.
    Failed,
}

/// One row of `report.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowRecord {
    /// Zero-based data row index.
    pub row_index: usize,
    /// Row number as shown in the spreadsheet.
    pub sheet_row: usize,
    /// Outcome.
    pub status: RowStatus,
    /// Strategy that found the image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    /// Resolved image URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Thumbnail file name, relative to the output directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Failure text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// What each strategy did, for rows no strategy resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<Vec<StrategyAttempt>>,
}

/// Contents of `report.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportFile {
    /// Rows in the input.
    pub total: usize,
    /// Rows with a thumbnail.
    pub succeeded: usize,
    /// Rows that failed.
    pub failed: usize,
    /// Blank or cancelled rows.
    pub skipped: usize,
    /// True when the batch was cancelled.
    pub cancelled: bool,
    /// Every row, input order.
    pub rows: Vec<RowRecord>,
}

/// Thumbnail file name for a row.
#[must_use]
pub fn thumbnail_file_name(row_index: usize) -> String {
    format!("row-{:04}.png", sheet_row_number(row_index))
}

impl ReportFile {
    /// Builds the report body from a batch report.
    #[must_use]
    pub fn from_report(report: &BatchReport) -> Self {
        let rows = report.outcomes.iter().map(row_record).collect();
        Self {
            total: report.total(),
            succeeded: report.succeeded(),
            failed: report.failed_rows().len(),
            skipped: report.skipped(),
            cancelled: report.was_cancelled,
            rows,
        }
    }
}

fn row_record(outcome: &ProcessingOutcome) -> RowRecord {
    let row_index = outcome.row_index();
    let mut record = RowRecord {
        row_index,
        sheet_row: sheet_row_number(row_index),
        status: RowStatus::Failed,
        strategy: None,
        image_url: None,
        file: None,
        reason: None,
        attempts: None,
    };
    match outcome {
        ProcessingOutcome::Success { image, .. } => {
            record.status = RowStatus::Success;
            record.strategy = Some(image.strategy_used);
            record.image_url = Some(image.image_url.clone());
            record.file = Some(thumbnail_file_name(row_index));
        }
        ProcessingOutcome::Skipped { reason, .. } => {
            record.status = match reason {
                SkipReason::EmptyRow => RowStatus::Empty,
                SkipReason::Cancelled => RowStatus::Cancelled,
            };
        }
        ProcessingOutcome::Failed { reason, .. } => {
            record.reason = Some(reason.to_string());
            record.attempts = reason.attempts().map(<[StrategyAttempt]>::to_vec);
        }
    }
    record
}

/// Writes thumbnails and `report.json` into `dir`, creating it if needed.
///
/// # Errors
///
/// [`OutputError::Io`] on any filesystem failure, [`OutputError::Encode`]
/// if a thumbnail cannot be encoded.
#[instrument(skip(report), fields(dir = %dir.display(), rows = report.total()))]
pub fn write_outputs(dir: &Path, report: &BatchReport) -> Result<ReportFile, OutputError> {
    fs::create_dir_all(dir).map_err(|source| OutputError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for outcome in &report.outcomes {
        let Some(bitmap) = outcome.bitmap() else {
            continue;
        };
        let row_index = outcome.row_index();
        let png = bitmap
            .to_png()
            .map_err(|source| OutputError::Encode { row_index, source })?;
        let path = dir.join(thumbnail_file_name(row_index));
        fs::write(&path, png).map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "thumbnail written");
    }

    let body = ReportFile::from_report(report);
    let path = dir.join(REPORT_FILE_NAME);
    let json = serde_json::to_string_pretty(&body)?;
    fs::write(&path, json).map_err(|source| OutputError::Io {
        path: path.clone(),
        source,
    })?;

    info!(
        succeeded = body.succeeded,
        failed = body.failed,
        report = %path.display(),
        "outputs written"
    );
    Ok(body)
}
