//! Error types for resolution strategies.
//!
//! Strategy errors are soft: the pipeline logs them, records them in the
//! trace, and moves on to the next strategy.

use thiserror::Error;

use crate::fetch::FetchError;

/// Errors a strategy can report while looking for an image URL.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// A request the strategy depended on failed.
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// A response arrived but could not be understood.
    #[error("could not parse {what} from '{input}': {reason}")]
    Parse {
        /// The URL or value being parsed.
        input: String,
        /// What was expected (e.g. "search token").
        what: String,
        /// Why parsing failed.
        reason: String,
    },

    /// The image search flow failed.
    #[error("image search for '{query}' failed: {reason}\n  Suggestion: {suggestion}")]
    Search {
        /// The query phrase that was sent.
        query: String,
        /// Why the search failed.
        reason: String,
        /// How to fix the issue.
        suggestion: String,
    },
}

impl ResolveError {
    /// Creates a `Parse` error.
    #[must_use]
    pub fn parse(input: &str, what: &str, reason: impl ToString) -> Self {
        Self::Parse {
            input: input.to_string(),
            what: what.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates a `Search` error.
    #[must_use]
    pub fn search(query: &str, reason: impl ToString) -> Self {
        Self::Search {
            query: query.to_string(),
            reason: reason.to_string(),
            suggestion: "Add a direct image URL for this row, or check the search endpoint"
                .to_string(),
        }
    }
}
