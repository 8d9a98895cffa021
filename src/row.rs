//! One spreadsheet row to zero-or-one image URL.
//!
//! A direct-image cell that already looks like an image URL wins outright and
//! costs no network call. Otherwise the page-URL cell goes through the
//! resolution pipeline; when that cell is blank, a direct-image cell that
//! failed the heuristic is tried instead.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::resolver::{
    AttemptOutcome, ResolutionPipeline, ResolutionTrace, ResolvedImage, StrategyAttempt,
    StrategyKind,
};

/// A row as read from the input, blank cells already mapped to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRow {
    /// Zero-based data row index (header excluded).
    pub index: usize,
    /// Product page URL, or free text.
    pub page_url: Option<String>,
    /// Image URL supplied directly.
    pub direct_image_url: Option<String>,
}

impl SourceRow {
    /// Builds a row, trimming cells and treating blank ones as absent.
    #[must_use]
    pub fn new(index: usize, page_url: Option<&str>, direct_image_url: Option<&str>) -> Self {
        Self {
            index,
            page_url: non_blank(page_url),
            direct_image_url: non_blank(direct_image_url),
        }
    }

    /// True when both cells are absent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.page_url.is_none() && self.direct_image_url.is_none()
    }
}

fn non_blank(cell: Option<&str>) -> Option<String> {
    cell.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Applies the two-column priority on top of a [`ResolutionPipeline`].
#[derive(Debug)]
pub struct RowProcessor {
    pipeline: Arc<ResolutionPipeline>,
}

impl RowProcessor {
    /// Wraps `pipeline`.
    #[must_use]
    pub fn new(pipeline: Arc<ResolutionPipeline>) -> Self {
        Self { pipeline }
    }

    /// The pipeline rows are resolved with.
    #[must_use]
    pub fn pipeline(&self) -> &ResolutionPipeline {
        &self.pipeline
    }

    /// Resolves a row to at most one image URL.
    pub async fn resolve_row(&self, row: &SourceRow) -> Option<ResolvedImage> {
        self.resolve_row_traced(row).await.resolved
    }

    /// Like [`resolve_row`](Self::resolve_row), returning the attempt trace.
    #[instrument(skip(self, row), fields(row = row.index))]
    pub async fn resolve_row_traced(&self, row: &SourceRow) -> ResolutionTrace {
        if let Some(direct) = row.direct_image_url.as_deref()
            && self.pipeline.catalog().looks_like_image_url(direct)
        {
            debug!(url = %direct, "direct image cell accepted");
            return direct_trace(row.index, direct);
        }

        let value = row
            .page_url
            .as_deref()
            .or(row.direct_image_url.as_deref())
            .unwrap_or_default();
        self.pipeline.resolve_traced(row.index, value).await
    }
}

fn direct_trace(row_index: usize, url: &str) -> ResolutionTrace {
    ResolutionTrace {
        value: url.to_string(),
        attempts: vec![StrategyAttempt {
            strategy: StrategyKind::DirectLink,
            outcome: AttemptOutcome::Found(url.to_string()),
        }],
        resolved: Some(ResolvedImage {
            source_row_index: row_index,
            image_url: url.to_string(),
            strategy_used: StrategyKind::DirectLink,
        }),
        page_error: None,
    }
}
