//! Batch processing: rows in, ordered outcomes out.
//!
//! The [`BatchDriver`] resolves, downloads and normalizes every row, with
//! optional row-level concurrency. Outcomes always come back in input order,
//! one per row, and no single row can abort the batch.

mod driver;

pub use driver::{BatchDriver, DEFAULT_ROW_CONCURRENCY, IN_FLIGHT_GRACE, MAX_ROW_CONCURRENCY};

use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

use crate::fetch::FetchError;
use crate::normalize::{Bitmap, DecodeError};
use crate::resolver::{AttemptOutcome, ResolvedImage, StrategyAttempt, StrategyKind};

/// Errors that stop a batch before it starts.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Row concurrency outside 1..=16.
    #[error("invalid row concurrency {value}: must be between 1 and {MAX_ROW_CONCURRENCY}")]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// Thumbnail size with a zero side.
    #[error("invalid thumbnail size {width}x{height}: both sides must be at least 1")]
    InvalidTarget {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
}

/// Why a row produced nothing without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Both cells blank.
    EmptyRow,
    /// Cancellation arrived before the row was claimed.
    Cancelled,
}

/// Why a row failed.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// Every strategy came up empty.
    NoImageFound {
        /// Every strategy slot in chain order, with what it did.
        attempts: Vec<StrategyAttempt>,
        /// Why the value's page could not be fetched, if it was requested.
        page_error: Option<FetchError>,
    },
    /// The resolved image could not be downloaded.
    Network(FetchError),
    /// The downloaded bytes could not be decoded or resized.
    Decode(DecodeError),
    /// The row's task panicked.
    TaskPanicked {
        /// Panic or join error text.
        message: String,
    },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoImageFound {
                attempts,
                page_error,
            } => {
                f.write_str("no image found")?;
                if let Some(error) = page_error {
                    write!(f, "; page fetch failed: {error}")?;
                }
                let tried: Vec<String> = attempts
                    .iter()
                    .filter_map(|attempt| match &attempt.outcome {
                        AttemptOutcome::Failed(message)
                            if !(page_error.is_some() && attempt.strategy.scrapes_page()) =>
                        {
                            Some(format!("{} failed: {message}", attempt.strategy))
                        }
                        AttemptOutcome::Skipped(_) => None,
                        _ => Some(attempt.strategy.as_str().to_string()),
                    })
                    .collect();
                if tried.is_empty() {
                    write!(f, " (no strategy applied)")
                } else {
                    write!(f, " (tried {})", tried.join("; "))
                }
            }
            Self::Network(error) => write!(f, "image download failed: {error}"),
            Self::Decode(error) => write!(f, "image decode failed: {error}"),
            Self::TaskPanicked { message } => write!(f, "row task panicked: {message}"),
        }
    }
}

impl FailureReason {
    /// Builds [`FailureReason::NoImageFound`] from strategies that all came up empty.
    #[must_use]
    pub fn no_image(attempted: &[StrategyKind]) -> Self {
        Self::NoImageFound {
            attempts: attempted
                .iter()
                .map(|&strategy| StrategyAttempt {
                    strategy,
                    outcome: AttemptOutcome::Empty,
                })
                .collect(),
            page_error: None,
        }
    }

    /// The per-strategy trace, for unresolved rows.
    #[must_use]
    pub fn attempts(&self) -> Option<&[StrategyAttempt]> {
        match self {
            Self::NoImageFound { attempts, .. } => Some(attempts),
            _ => None,
        }
    }
}

/// Result for one input row.
#[derive(Debug, Clone)]
pub enum ProcessingOutcome {
    /// Resolved, downloaded and normalized.
    Success {
        /// How the image was found.
        image: ResolvedImage,
        /// The thumbnail.
        bitmap: Bitmap,
    },
    /// Nothing to do.
    Skipped {
        /// Row index.
        row_index: usize,
        /// Why.
        reason: SkipReason,
    },
    /// Tried and failed.
    Failed {
        /// Row index.
        row_index: usize,
        /// Why.
        reason: FailureReason,
    },
}

impl ProcessingOutcome {
    /// The row this outcome belongs to.
    #[must_use]
    pub fn row_index(&self) -> usize {
        match self {
            Self::Success { image, .. } => image.source_row_index,
            Self::Skipped { row_index, .. } | Self::Failed { row_index, .. } => *row_index,
        }
    }

    /// True for [`ProcessingOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The bitmap, for successful rows.
    #[must_use]
    pub fn bitmap(&self) -> Option<&Bitmap> {
        match self {
            Self::Success { bitmap, .. } => Some(bitmap),
            _ => None,
        }
    }
}

/// Live counters, safe to read from a progress display while the batch runs.
#[derive(Debug, Default)]
pub struct BatchStats {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl BatchStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows that produced a thumbnail.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Rows that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Rows skipped (empty or cancelled).
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Rows finished so far.
    #[must_use]
    pub fn done(&self) -> usize {
        self.succeeded() + self.failed() + self.skipped()
    }

    fn record(&self, outcome: &ProcessingOutcome) {
        let counter = match outcome {
            ProcessingOutcome::Success { .. } => &self.succeeded,
            ProcessingOutcome::Failed { .. } => &self.failed,
            ProcessingOutcome::Skipped { .. } => &self.skipped,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// All outcomes of one batch, in input order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// One outcome per input row, same order as the input.
    pub outcomes: Vec<ProcessingOutcome>,
    /// True when cancellation stopped the batch early.
    pub was_cancelled: bool,
}

impl BatchReport {
    /// Number of successful rows.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Failed rows with their reasons, in input order.
    #[must_use]
    pub fn failed_rows(&self) -> Vec<(usize, &FailureReason)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                ProcessingOutcome::Failed { row_index, reason } => Some((*row_index, reason)),
                _ => None,
            })
            .collect()
    }

    /// Number of skipped rows.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ProcessingOutcome::Skipped { .. }))
            .count()
    }

    /// Number of rows.
    #[must_use]
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}
