//! Dry-run output and the startup column-kind hint.

use sheet_images_core::resolver::parse_http_url;
use sheet_images_core::{
    BatchReport, ProcessingOutcome, SkipReason, SourceRow, VendorCatalog, sheet_row_number,
};

/// What the first non-blank sample value looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    DirectImages,
    PageUrls,
    FreeText,
}

/// Classifies the first non-blank value, preferring the direct-image column.
pub(crate) fn sample_column_kind(rows: &[SourceRow], catalog: &VendorCatalog) -> Option<ColumnKind> {
    let sample = rows
        .iter()
        .find_map(|row| row.direct_image_url.as_deref())
        .or_else(|| rows.iter().find_map(|row| row.page_url.as_deref()))?;

    Some(if catalog.looks_like_image_url(sample) {
        ColumnKind::DirectImages
    } else if parse_http_url(sample).is_some() {
        ColumnKind::PageUrls
    } else {
        ColumnKind::FreeText
    })
}

pub(crate) fn render_column_hint(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::DirectImages => {
            "Hint: sample value looks like a direct image URL; rows should resolve without scraping."
        }
        ColumnKind::PageUrls => {
            "Hint: sample value looks like a product page URL; scraping will be attempted and some vendors block it. Add a direct image URL column for reliable results."
        }
        ColumnKind::FreeText => {
            "Hint: sample value is not a URL; rows will rely on image search."
        }
    }
}

/// One line per row, then `Preview: N/M successful`.
pub(crate) fn render_preview_lines(report: &BatchReport) -> Vec<String> {
    let mut lines = Vec::with_capacity(report.total() + 2);
    lines.push(format!("Preview of the first {} rows:", report.total()));
    for outcome in &report.outcomes {
        let row = sheet_row_number(outcome.row_index());
        let line = match outcome {
            ProcessingOutcome::Success { image, .. } => {
                format!("  Row {row}: ok via {} {}", image.strategy_used, image.image_url)
            }
            ProcessingOutcome::Failed { reason, .. } => format!("  Row {row}: failed: {reason}"),
            ProcessingOutcome::Skipped {
                reason: SkipReason::EmptyRow,
                ..
            } => format!("  Row {row}: skipped (empty)"),
            ProcessingOutcome::Skipped {
                reason: SkipReason::Cancelled,
                ..
            } => format!("  Row {row}: skipped (cancelled)"),
        };
        lines.push(line);
    }
    lines.push(format!(
        "Preview: {}/{} successful",
        report.succeeded(),
        report.total()
    ));
    lines
}
