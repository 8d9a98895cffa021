//! Semaphore-bounded row processing with input-order results.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::{
    BatchError, BatchReport, BatchStats, FailureReason, ProcessingOutcome, SkipReason,
};
use crate::fetch::{FetchError, wait_for_cancel};
use crate::normalize::{TargetSize, normalize};
use crate::row::{RowProcessor, SourceRow};

/// Sequential by default.
pub const DEFAULT_ROW_CONCURRENCY: usize = 1;

/// Upper bound for row-level concurrency.
pub const MAX_ROW_CONCURRENCY: usize = 16;

/// How long rows already running may keep going after cancellation.
pub const IN_FLIGHT_GRACE: Duration = Duration::from_secs(2);

/// Drives rows through resolve, download and normalize.
///
/// # Concurrency Model
///
/// - Each row runs in its own Tokio task once a semaphore permit is held
/// - Results land in a slot keyed by the row's input position
/// - Per-host limits and pacing live in the shared fetcher, not here
///
/// # Cancellation
///
/// When the flag flips, no further rows are claimed. Rows already running
/// get [`IN_FLIGHT_GRACE`] to finish and are then abandoned. Unclaimed and
/// abandoned rows are reported as [`SkipReason::Cancelled`].
#[derive(Debug)]
pub struct BatchDriver {
    processor: Arc<RowProcessor>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    target: TargetSize,
    grace: Duration,
}

impl BatchDriver {
    /// Creates a driver.
    ///
    /// # Errors
    ///
    /// [`BatchError::InvalidConcurrency`] outside 1..=16, and
    /// [`BatchError::InvalidTarget`] for a zero-sided thumbnail.
    #[instrument(level = "debug", skip(processor))]
    pub fn new(
        processor: Arc<RowProcessor>,
        target: TargetSize,
        concurrency: usize,
    ) -> Result<Self, BatchError> {
        if !(1..=MAX_ROW_CONCURRENCY).contains(&concurrency) {
            return Err(BatchError::InvalidConcurrency { value: concurrency });
        }
        if target.width == 0 || target.height == 0 {
            return Err(BatchError::InvalidTarget {
                width: target.width,
                height: target.height,
            });
        }

        debug!(
            concurrency,
            width = target.width,
            height = target.height,
            "creating batch driver"
        );

        Ok(Self {
            processor,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            target,
            grace: IN_FLIGHT_GRACE,
        })
    }

    /// Overrides how long in-flight rows may run after cancellation.
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Configured row concurrency.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Thumbnail size every success is resized to.
    #[must_use]
    pub fn target(&self) -> TargetSize {
        self.target
    }

    /// Resolves, downloads and normalizes a single row.
    pub async fn process_row(&self, row: &SourceRow) -> ProcessingOutcome {
        run_row(&self.processor, self.target, row, &AtomicBool::new(false)).await
    }

    /// Processes every row; see [`process_rows_with_stats`](Self::process_rows_with_stats).
    pub async fn process_rows(
        &self,
        rows: Vec<SourceRow>,
        cancel: Arc<AtomicBool>,
    ) -> BatchReport {
        self.process_rows_with_stats(rows, cancel, Arc::new(BatchStats::new()))
            .await
    }

    /// Processes every row, updating `stats` as rows finish.
    ///
    /// Individual row failures never fail the batch; a panicking row task is
    /// reported as [`FailureReason::TaskPanicked`].
    #[instrument(skip_all, fields(rows = rows.len(), concurrency = self.concurrency))]
    pub async fn process_rows_with_stats(
        &self,
        rows: Vec<SourceRow>,
        cancel: Arc<AtomicBool>,
        stats: Arc<BatchStats>,
    ) -> BatchReport {
        let row_indices: Vec<usize> = rows.iter().map(|r| r.index).collect();
        let mut slots: Vec<Option<ProcessingOutcome>> = vec![None; rows.len()];
        let mut handles = Vec::with_capacity(rows.len());
        let mut was_cancelled = false;

        info!("starting batch");

        for (position, row) in rows.into_iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                was_cancelled = true;
                break;
            }

            // Race the permit against cancellation so a full pool does not delay the stop.
            let permit = tokio::select! {
                biased;
                () = wait_for_cancel(&cancel) => None,
                result = Arc::clone(&self.semaphore).acquire_owned() => result.ok(),
            };
            let Some(permit) = permit else {
                was_cancelled = true;
                break;
            };

            let processor = Arc::clone(&self.processor);
            let stats = Arc::clone(&stats);
            let cancel = Arc::clone(&cancel);
            let target = self.target;
            let grace = self.grace;
            handles.push((
                position,
                tokio::spawn(async move {
                    let _permit = permit;
                    let outcome = tokio::select! {
                        outcome = run_row(&processor, target, &row, &cancel) => outcome,
                        () = grace_after_cancel(&cancel, grace) => {
                            warn!(row = row.index, "row abandoned after cancellation");
                            cancelled(row.index)
                        }
                    };
                    stats.record(&outcome);
                    outcome
                }),
            ));
        }

        debug!(task_count = handles.len(), "waiting for rows to finish");

        for (position, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(row = row_indices[position], error = %e, "row task panicked");
                    let outcome = ProcessingOutcome::Failed {
                        row_index: row_indices[position],
                        reason: FailureReason::TaskPanicked {
                            message: e.to_string(),
                        },
                    };
                    stats.record(&outcome);
                    outcome
                }
            };
            slots[position] = Some(outcome);
        }

        let outcomes: Vec<ProcessingOutcome> = slots
            .into_iter()
            .zip(row_indices)
            .map(|(slot, row_index)| {
                slot.unwrap_or_else(|| {
                    let outcome = ProcessingOutcome::Skipped {
                        row_index,
                        reason: SkipReason::Cancelled,
                    };
                    stats.record(&outcome);
                    outcome
                })
            })
            .collect();

        let report = BatchReport {
            outcomes,
            was_cancelled,
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed_rows().len(),
            skipped = report.skipped(),
            cancelled = was_cancelled,
            "batch complete"
        );
        report
    }
}

async fn grace_after_cancel(cancel: &AtomicBool, grace: Duration) {
    wait_for_cancel(cancel).await;
    tokio::time::sleep(grace).await;
}

fn cancelled(row_index: usize) -> ProcessingOutcome {
    ProcessingOutcome::Skipped {
        row_index,
        reason: SkipReason::Cancelled,
    }
}

#[instrument(skip(processor, row, cancel), fields(row = row.index))]
async fn run_row(
    processor: &RowProcessor,
    target: TargetSize,
    row: &SourceRow,
    cancel: &AtomicBool,
) -> ProcessingOutcome {
    if row.is_empty() {
        debug!("empty row");
        return ProcessingOutcome::Skipped {
            row_index: row.index,
            reason: SkipReason::EmptyRow,
        };
    }

    let trace = processor.resolve_row_traced(row).await;
    let Some(image) = trace.resolved.clone() else {
        if cancel.load(Ordering::SeqCst) {
            debug!("resolution interrupted by cancellation");
            return cancelled(row.index);
        }
        info!(attempted = trace.attempted().len(), "no image found");
        return ProcessingOutcome::Failed {
            row_index: row.index,
            reason: FailureReason::NoImageFound {
                attempts: trace.attempts,
                page_error: trace.page_error,
            },
        };
    };

    let fetcher = processor.pipeline().fetcher();
    let bytes = match fetcher.fetch_image(&image.image_url).await {
        Ok(bytes) => bytes,
        Err(FetchError::Cancelled { .. }) => return cancelled(row.index),
        Err(error) => {
            warn!(url = %image.image_url, error = %error, "image download failed");
            return ProcessingOutcome::Failed {
                row_index: row.index,
                reason: FailureReason::Network(error),
            };
        }
    };

    let decoded =
        tokio::task::spawn_blocking(move || normalize(&bytes, target.width, target.height)).await;
    match decoded {
        Ok(Ok(bitmap)) => {
            info!(strategy = %image.strategy_used, url = %image.image_url, "row complete");
            ProcessingOutcome::Success { image, bitmap }
        }
        Ok(Err(error)) => {
            warn!(url = %image.image_url, error = %error, "image decode failed");
            ProcessingOutcome::Failed {
                row_index: row.index,
                reason: FailureReason::Decode(error),
            }
        }
        Err(e) => ProcessingOutcome::Failed {
            row_index: row.index,
            reason: FailureReason::TaskPanicked {
                message: e.to_string(),
            },
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbImage};

    use super::*;
    use crate::fetch::{FetchRequest, FetchResponse, FetchTransport, Fetcher, RateLimiter};
    use crate::resolver::{ResolutionPipeline, SearchFallback, StrategyKind, VendorCatalog};

    // ==================== Test transport ====================

    /// Serves a PNG for `.png` URLs, garbage for `.jpg`, 404 otherwise.
    struct ImageServer {
        png: Vec<u8>,
        delay_ms: u64,
    }

    #[async_trait]
    impl FetchTransport for ImageServer {
        async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            let (status, content_type, body) = if request.url.ends_with(".png") {
                (200, "image/png", self.png.clone())
            } else if request.url.ends_with(".jpg") {
                (200, "image/jpeg", vec![0xAB; 64])
            } else {
                (404, "text/html", Vec::new())
            };
            Ok(FetchResponse {
                status,
                final_url: request.url.clone(),
                content_type: Some(content_type.to_string()),
                retry_after: None,
                body,
            })
        }
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(40, 10))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn driver(concurrency: usize, delay_ms: u64) -> BatchDriver {
        let fetcher = Fetcher::new(Arc::new(ImageServer {
            png: png_bytes(),
            delay_ms,
        }))
        .with_rate_limiter(Arc::new(RateLimiter::disabled()));
        let catalog = Arc::new(VendorCatalog::embedded().unwrap());
        let pipeline = ResolutionPipeline::standard(fetcher, catalog, "http://127.0.0.1:9")
            .with_search_fallback(SearchFallback::Never);
        let processor = Arc::new(RowProcessor::new(Arc::new(pipeline)));
        BatchDriver::new(processor, TargetSize::new(20, 20), concurrency).unwrap()
    }

    fn image_row(index: usize) -> SourceRow {
        SourceRow::new(index, None, Some(&format!("https://img.test/{index}.png")))
    }

    // ==================== Construction ====================

    #[test]
    fn test_driver_rejects_bad_concurrency() {
        let fetcher = Fetcher::new(Arc::new(ImageServer {
            png: Vec::new(),
            delay_ms: 0,
        }));
        let catalog = Arc::new(VendorCatalog::embedded().unwrap());
        let pipeline = Arc::new(ResolutionPipeline::new(fetcher, catalog));
        let processor = Arc::new(RowProcessor::new(pipeline));

        for bad in [0, MAX_ROW_CONCURRENCY + 1] {
            let err = BatchDriver::new(Arc::clone(&processor), TargetSize::CELL, bad).unwrap_err();
            assert!(matches!(err, BatchError::InvalidConcurrency { value } if value == bad));
        }
        let err = BatchDriver::new(processor, TargetSize::new(0, 10), 1).unwrap_err();
        assert!(matches!(err, BatchError::InvalidTarget { .. }));
    }

    // ==================== Single row ====================

    #[tokio::test]
    async fn test_process_row_success_resizes_exactly() {
        let outcome = driver(1, 0).process_row(&image_row(7)).await;
        let ProcessingOutcome::Success { image, bitmap } = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(image.source_row_index, 7);
        assert_eq!(image.strategy_used, StrategyKind::DirectLink);
        assert_eq!((bitmap.width(), bitmap.height()), (20, 20));
    }

    #[tokio::test]
    async fn test_process_row_empty_is_skipped() {
        let outcome = driver(1, 0).process_row(&SourceRow::new(2, None, None)).await;
        assert!(matches!(
            outcome,
            ProcessingOutcome::Skipped {
                row_index: 2,
                reason: SkipReason::EmptyRow
            }
        ));
    }

    #[tokio::test]
    async fn test_process_row_decode_failure() {
        let row = SourceRow::new(0, None, Some("https://img.test/broken.jpg"));
        let outcome = driver(1, 0).process_row(&row).await;
        assert!(matches!(
            outcome,
            ProcessingOutcome::Failed {
                reason: FailureReason::Decode(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_process_row_download_failure_is_network() {
        let row = SourceRow::new(0, None, Some("https://img.test/missing.gif"));
        let outcome = driver(1, 0).process_row(&row).await;
        assert!(matches!(
            outcome,
            ProcessingOutcome::Failed {
                reason: FailureReason::Network(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_process_row_unresolved_is_no_image_found() {
        let row = SourceRow::new(0, Some("oak table"), None);
        let outcome = driver(1, 0).process_row(&row).await;
        assert!(matches!(
            outcome,
            ProcessingOutcome::Failed {
                reason: FailureReason::NoImageFound { .. },
                ..
            }
        ));
    }

    // ==================== Batch ====================

    #[tokio::test]
    async fn test_batch_preserves_input_order_under_concurrency() {
        let rows: Vec<SourceRow> = (0..12).map(image_row).collect();
        let report = driver(6, 5)
            .process_rows(rows, Arc::new(AtomicBool::new(false)))
            .await;
        let indices: Vec<usize> = report.outcomes.iter().map(ProcessingOutcome::row_index).collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
        assert_eq!(report.succeeded(), 12);
        assert!(!report.was_cancelled);
    }

    #[tokio::test]
    async fn test_batch_cancelled_before_start_skips_everything() {
        let rows: Vec<SourceRow> = (0..3).map(image_row).collect();
        let stats = Arc::new(BatchStats::new());
        let report = driver(1, 0)
            .process_rows_with_stats(rows, Arc::new(AtomicBool::new(true)), Arc::clone(&stats))
            .await;
        assert!(report.was_cancelled);
        assert_eq!(report.total(), 3);
        assert!(report.outcomes.iter().all(|o| matches!(
            o,
            ProcessingOutcome::Skipped {
                reason: SkipReason::Cancelled,
                ..
            }
        )));
        assert_eq!(stats.skipped(), 3);
    }

    #[tokio::test]
    async fn test_batch_cancel_mid_run_keeps_finished_rows() {
        let rows: Vec<SourceRow> = (0..20).map(image_row).collect();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let report = driver(1, 40).process_rows(rows, cancel).await;
        assert!(report.was_cancelled);
        assert_eq!(report.total(), 20);
        assert!(report.succeeded() >= 1);
        assert!(report.skipped() >= 1);
        let indices: Vec<usize> = report.outcomes.iter().map(ProcessingOutcome::row_index).collect();
        assert_eq!(indices, (0..20).collect::<Vec<_>>());
    }

    /// Answers every request with 429 and a one-hour Retry-After.
    struct Throttled;

    #[async_trait]
    impl FetchTransport for Throttled {
        async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            Ok(FetchResponse {
                status: 429,
                final_url: request.url.clone(),
                content_type: None,
                retry_after: Some("3600".to_string()),
                body: Vec::new(),
            })
        }
    }

    fn throttled_driver(fetcher: Fetcher) -> BatchDriver {
        let catalog = Arc::new(VendorCatalog::embedded().unwrap());
        let pipeline = ResolutionPipeline::standard(fetcher, catalog, "http://127.0.0.1:9")
            .with_search_fallback(SearchFallback::Never);
        let processor = Arc::new(RowProcessor::new(Arc::new(pipeline)));
        BatchDriver::new(processor, TargetSize::new(20, 20), 1)
            .unwrap()
            .with_grace_period(Duration::from_millis(300))
    }

    fn cancel_after(delay: Duration) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            flag.store(true, Ordering::SeqCst);
        });
        cancel
    }

    #[tokio::test]
    async fn test_cancel_abandons_row_stuck_in_retry_after() {
        let fetcher =
            Fetcher::new(Arc::new(Throttled)).with_rate_limiter(Arc::new(RateLimiter::disabled()));
        let rows: Vec<SourceRow> = (0..2).map(image_row).collect();
        let cancel = cancel_after(Duration::from_millis(100));

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            throttled_driver(fetcher).process_rows(rows, cancel),
        )
        .await
        .expect("batch must return soon after cancellation");

        assert!(report.was_cancelled);
        assert_eq!(report.total(), 2);
        assert!(report.outcomes.iter().all(|o| matches!(
            o,
            ProcessingOutcome::Skipped {
                reason: SkipReason::Cancelled,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_cancel_flag_on_fetcher_ends_back_off_early() {
        let cancel = cancel_after(Duration::from_millis(100));
        let fetcher = Fetcher::new(Arc::new(Throttled))
            .with_rate_limiter(Arc::new(RateLimiter::disabled()))
            .with_cancel_flag(Arc::clone(&cancel));
        let driver = throttled_driver(fetcher).with_grace_period(Duration::from_secs(60));

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            driver.process_rows(vec![image_row(0)], cancel),
        )
        .await
        .expect("fetcher must stop backing off on cancel");

        assert!(matches!(
            report.outcomes[0],
            ProcessingOutcome::Skipped {
                reason: SkipReason::Cancelled,
                ..
            }
        ));
    }
}
