//! End-of-run summary printed to stdout.

use std::collections::BTreeMap;

use sheet_images_core::{FailureReason, ReportFile, sheet_row_number};

use crate::failure::{self, FailureCategory};

const MAX_ROWS_PER_CATEGORY: usize = 10;

pub(crate) fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|width| *width >= 20)
        .unwrap_or(80)
}

/// Truncates text to at most `width` chars, appending ellipsis if truncated.
pub(crate) fn truncate_to_width(text: &str, width: usize) -> String {
    let text_len = text.chars().count();
    if text_len <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    if width == 1 {
        return "…".to_string();
    }

    let mut output: String = text.chars().take(width - 1).collect();
    output.push('…');
    output
}

pub(crate) fn render_totals_line(report: &ReportFile) -> String {
    let mut line = format!(
        "{} of {} rows have a thumbnail ({} failed, {} skipped)",
        report.succeeded, report.total, report.failed, report.skipped
    );
    if report.cancelled {
        line.push_str(", cancelled");
    }
    line
}

/// Groups failed rows by category with what/why/fix lines and the sheet rows affected.
pub(crate) fn render_failure_summary_lines(
    failed_rows: &[(usize, &FailureReason)],
    width: usize,
) -> Vec<String> {
    if failed_rows.is_empty() {
        return Vec::new();
    }

    let mut grouped: BTreeMap<FailureCategory, Vec<(usize, &FailureReason)>> = BTreeMap::new();
    for (row_index, reason) in failed_rows {
        let descriptor = failure::describe_failure(reason);
        grouped
            .entry(descriptor.category)
            .or_default()
            .push((*row_index, *reason));
    }

    let mut lines = vec![truncate_to_width("Failure summary by category:", width)];
    for (category, rows) in &grouped {
        let descriptor = failure::describe_failure(rows[0].1);
        let header = format!("- {} {}: {}", category.icon(), category.label(), rows.len());
        lines.push(truncate_to_width(&header, width));
        lines.push(truncate_to_width(&format!("  What: {}", descriptor.what), width));
        lines.push(truncate_to_width(&format!("  Why: {}", descriptor.why), width));
        lines.push(truncate_to_width(&format!("  Fix: {}", descriptor.fix), width));

        for (row_index, reason) in rows.iter().take(MAX_ROWS_PER_CATEGORY) {
            let line = format!("    Row {}: {reason}", sheet_row_number(*row_index));
            lines.push(truncate_to_width(&line, width));
        }
        if rows.len() > MAX_ROWS_PER_CATEGORY {
            lines.push(format!(
                "    ... and {} more",
                rows.len() - MAX_ROWS_PER_CATEGORY
            ));
        }
    }
    lines
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sheet_images_core::{FetchError, StrategyKind};

    #[test]
    fn test_truncate_to_width() {
        assert_eq!(truncate_to_width("abc", 5), "abc");
        assert_eq!(truncate_to_width("abcdef", 4), "abc…");
        assert_eq!(truncate_to_width("abcdef", 1), "…");
        assert_eq!(truncate_to_width("abcdef", 0), "");
    }

    #[test]
    fn test_failure_summary_empty_without_failures() {
        assert!(render_failure_summary_lines(&[], 80).is_empty());
    }

    #[test]
    fn test_failure_summary_groups_and_uses_sheet_rows() {
        let no_image = FailureReason::no_image(&[StrategyKind::MetaTag]);
        let blocked = FailureReason::Network(FetchError::http_status("https://a.test/x.jpg", 403));
        let rows = vec![(0, &no_image), (4, &blocked), (7, &no_image)];

        let lines = render_failure_summary_lines(&rows, 200);
        assert_eq!(lines[0], "Failure summary by category:");
        assert!(lines[1].contains("No image found: 2"));
        assert!(lines.iter().any(|l| l.contains("Fix: Add a direct image URL for this row.")));
        assert!(lines.iter().any(|l| l.starts_with("    Row 2:")));
        assert!(lines.iter().any(|l| l.starts_with("    Row 9:")));
        assert!(lines.iter().any(|l| l.contains("Blocked: 1")));
        assert!(lines.iter().any(|l| l.starts_with("    Row 6:")));
    }

    #[test]
    fn test_failure_summary_caps_rows_per_category() {
        let no_image = FailureReason::no_image(&[]);
        let rows: Vec<_> = (0..15).map(|i| (i, &no_image)).collect();
        let lines = render_failure_summary_lines(&rows, 200);
        assert_eq!(lines.iter().filter(|l| l.contains("Row ")).count(), 10);
        assert_eq!(lines.last().unwrap(), "    ... and 5 more");
    }

    #[test]
    fn test_totals_line_mentions_cancellation() {
        let report = ReportFile {
            total: 3,
            succeeded: 1,
            failed: 1,
            skipped: 1,
            cancelled: true,
            rows: Vec::new(),
        };
        assert_eq!(
            render_totals_line(&report),
            "1 of 3 rows have a thumbnail (1 failed, 1 skipped), cancelled"
        );
    }
}
