//! HTTP fetching for pages, images and existence probes.
//!
//! # Features
//!
//! - Desktop browser identity with per-kind `Accept` headers
//! - Hard per-request timeouts (page 15s, image 20s, probe 5s)
//! - Exponential backoff for 429/5xx/timeouts, Retry-After honored
//! - Per-domain spacing and a per-host in-flight cap shared by all rows
//! - Image sanity checks before any decode is attempted
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sheet_images_core::fetch::{Fetcher, HttpTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Fetcher::new(Arc::new(HttpTransport::new()?));
//! let bytes = fetcher.fetch_image("https://example.com/lamp.jpg").await?;
//! println!("{} bytes", bytes.len());
//! # Ok(())
//! # }
//! ```

pub mod constants;
mod error;
mod fetcher;
mod host_limiter;
pub mod rate_limiter;
mod retry;
mod transport;

pub use error::FetchError;
pub use fetcher::{FetchTimeouts, FetchedPage, Fetcher};
pub(crate) use fetcher::wait_for_cancel;
pub use host_limiter::HostLimiter;
pub use rate_limiter::{RateLimiter, extract_domain, parse_retry_after};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use transport::{
    FetchKind, FetchMethod, FetchRequest, FetchResponse, FetchTransport, HttpTransport,
};

// No module-local Result alias: signatures spell out `Result<T, FetchError>`.
