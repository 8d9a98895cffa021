//! Error types for the fetch module.
//!
//! Every variant carries the URL it concerns so row reports can point the
//! user at the exact request that failed.

use thiserror::Error;

/// Errors that can occur while fetching pages, images or probes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Connection-level failure (DNS, refused connection, TLS, reset).
    #[error("network error fetching {url}: {reason}")]
    Network {
        /// The URL that failed.
        url: String,
        /// Rendered transport error.
        reason: String,
    },

    /// Request exceeded its hard timeout.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// The URL is malformed or not http(s).
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected URL string.
        url: String,
    },

    /// The response to an image request is obviously not an image.
    #[error("not an image at {url}: {reason}")]
    NotAnImage {
        /// The URL that was fetched.
        url: String,
        /// What gave it away (content type, size).
        reason: String,
    },

    /// Body exceeded the configured size cap.
    #[error("response from {url} exceeds {limit_bytes} bytes")]
    TooLarge {
        /// The URL that was fetched.
        url: String,
        /// The configured cap.
        limit_bytes: u64,
    },

    /// The batch was cancelled while this request was pending.
    #[error("cancelled while fetching {url}")]
    Cancelled {
        /// The URL that was abandoned.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("HTTP client construction failed: {reason}")]
    ClientBuild {
        /// Why construction failed.
        reason: String,
    },
}

impl FetchError {
    /// Creates a network error.
    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a not-an-image error.
    pub fn not_an_image(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotAnImage {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a body-size error.
    pub fn too_large(url: impl Into<String>, limit_bytes: u64) -> Self {
        Self::TooLarge {
            url: url.into(),
            limit_bytes,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates a client construction error.
    pub fn client_build(reason: impl ToString) -> Self {
        Self::ClientBuild {
            reason: reason.to_string(),
        }
    }

    /// Returns the HTTP status for status errors.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// No `From<reqwest::Error>`: every variant needs the request URL, which the
// source error does not reliably carry. Use the constructors above.
