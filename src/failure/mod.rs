//! Failure classification and user-facing what/why/fix descriptors for rows.

use sheet_images_core::{DecodeError, FailureReason, FetchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailureCategory {
    NoImage,
    Blocked,
    Source,
    Network,
    Content,
    Other,
}

impl FailureCategory {
    #[must_use]
    pub fn icon(self) -> &'static str {
        match self {
            Self::NoImage => "🔍",
            Self::Blocked => "🚫",
            Self::Source => "❌",
            Self::Network => "🌐",
            Self::Content => "🖼️",
            Self::Other => "⚠️",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NoImage => "No image found",
            Self::Blocked => "Blocked",
            Self::Source => "Image link broken",
            Self::Network => "Network",
            Self::Content => "Not a usable image",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureDescriptor {
    pub category: FailureCategory,
    pub what: &'static str,
    pub why: &'static str,
    pub fix: &'static str,
}

/// Maps a row failure to its descriptor.
#[must_use]
pub fn describe_failure(reason: &FailureReason) -> FailureDescriptor {
    match reason {
        FailureReason::NoImageFound {
            page_error: Some(error),
            ..
        } if is_blocked_status(error) => category_failure_descriptor(FailureCategory::Blocked),
        FailureReason::NoImageFound { .. } => category_failure_descriptor(FailureCategory::NoImage),
        FailureReason::Network(error) => describe_fetch_error(error),
        FailureReason::Decode(DecodeError::InvalidTarget { .. }) => FailureDescriptor {
            category: FailureCategory::Other,
            what: "Invalid thumbnail size",
            why: "The requested width or height is zero.",
            fix: "Pass --width and --height of at least 1, or use --preset.",
        },
        FailureReason::Decode(_) => category_failure_descriptor(FailureCategory::Content),
        FailureReason::TaskPanicked { .. } => category_failure_descriptor(FailureCategory::Other),
    }
}

fn is_blocked_status(error: &FetchError) -> bool {
    matches!(error.status(), Some(401 | 403 | 429))
}

fn describe_fetch_error(error: &FetchError) -> FailureDescriptor {
    match error {
        _ if is_blocked_status(error) => category_failure_descriptor(FailureCategory::Blocked),
        FetchError::HttpStatus { status: 404 | 410, .. } | FetchError::InvalidUrl { .. } => {
            category_failure_descriptor(FailureCategory::Source)
        }
        FetchError::NotAnImage { .. } | FetchError::TooLarge { .. } => {
            category_failure_descriptor(FailureCategory::Content)
        }
        FetchError::Timeout { .. } | FetchError::Network { .. } | FetchError::HttpStatus { .. } => {
            category_failure_descriptor(FailureCategory::Network)
        }
        FetchError::Cancelled { .. } | FetchError::ClientBuild { .. } => {
            category_failure_descriptor(FailureCategory::Other)
        }
    }
}

/// Canonical descriptor for a category, used for grouped summaries.
#[must_use]
pub fn category_failure_descriptor(category: FailureCategory) -> FailureDescriptor {
    match category {
        FailureCategory::NoImage => FailureDescriptor {
            category,
            what: "No image could be found for this row",
            why: "Direct link, CDN guess, page tags, structured data and search all came up empty.",
            fix: "Add a direct image URL for this row.",
        },
        FailureCategory::Blocked => FailureDescriptor {
            category,
            what: "The site refused the request",
            why: "The page or image host answered 401/403/429, which usually means bot protection or rate limiting.",
            fix: "Raise --rate-limit, lower --per-host, or add a direct image URL for this row.",
        },
        FailureCategory::Source => FailureDescriptor {
            category,
            what: "The resolved image link is broken",
            why: "The image URL returned 404/410 or is not a valid URL.",
            fix: "Replace the link with a current image URL.",
        },
        FailureCategory::Network => FailureDescriptor {
            category,
            what: "The image download failed",
            why: "Timeouts, connection errors or server errors persisted through every retry.",
            fix: "Check connectivity, then rerun; raise --max-retries for flaky hosts.",
        },
        FailureCategory::Content => FailureDescriptor {
            category,
            what: "The downloaded file is not a usable image",
            why: "The response was HTML/JSON, too small, too large, or could not be decoded.",
            fix: "Point the row at the image file itself rather than a page.",
        },
        FailureCategory::Other => FailureDescriptor {
            category,
            what: "Unhandled failure",
            why: "The error did not match a known category and needs closer inspection.",
            fix: "Rerun with -v and inspect the logs for this row.",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheet_images_core::StrategyKind;

    #[test]
    fn test_no_image_found_suggests_direct_url() {
        let d = describe_failure(&FailureReason::no_image(&[StrategyKind::SearchEngine]));
        assert_eq!(d.category, FailureCategory::NoImage);
        assert!(d.fix.contains("direct image URL"));
    }

    #[test]
    fn test_blocked_page_is_blocked_not_no_image() {
        let reason = FailureReason::NoImageFound {
            attempts: Vec::new(),
            page_error: Some(FetchError::http_status("https://shop.test/p", 403)),
        };
        let d = describe_failure(&reason);
        assert_eq!(d.category, FailureCategory::Blocked);
        assert!(d.fix.contains("direct image URL"));

        let gone = FailureReason::NoImageFound {
            attempts: Vec::new(),
            page_error: Some(FetchError::http_status("https://shop.test/p", 404)),
        };
        assert_eq!(describe_failure(&gone).category, FailureCategory::NoImage);
    }

    #[test]
    fn test_fetch_status_categories() {
        let blocked = FailureReason::Network(FetchError::http_status("https://a.test/x.jpg", 403));
        assert_eq!(describe_failure(&blocked).category, FailureCategory::Blocked);

        let missing = FailureReason::Network(FetchError::http_status("https://a.test/x.jpg", 404));
        assert_eq!(describe_failure(&missing).category, FailureCategory::Source);

        let server = FailureReason::Network(FetchError::http_status("https://a.test/x.jpg", 502));
        assert_eq!(describe_failure(&server).category, FailureCategory::Network);

        let timeout = FailureReason::Network(FetchError::timeout("https://a.test/x.jpg"));
        assert_eq!(describe_failure(&timeout).category, FailureCategory::Network);
    }

    #[test]
    fn test_content_failures() {
        let html = FailureReason::Network(FetchError::not_an_image(
            "https://a.test/x.jpg",
            "content type text/html",
        ));
        assert_eq!(describe_failure(&html).category, FailureCategory::Content);

        let corrupt = FailureReason::Decode(DecodeError::Corrupt {
            reason: "eof".to_string(),
        });
        assert_eq!(describe_failure(&corrupt).category, FailureCategory::Content);
    }

    #[test]
    fn test_category_ordering_is_stable() {
        assert!(FailureCategory::NoImage < FailureCategory::Other);
        assert_eq!(FailureCategory::Network.label(), "Network");
    }
}
