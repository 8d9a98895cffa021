//! Constants for the fetch module (timeouts, size caps, pacing).

use std::time::Duration;

/// Connect timeout applied by the default transport (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Hard ceiling for an HTML page request (15 seconds).
pub const PAGE_TIMEOUT_SECS: u64 = 15;

/// Hard ceiling for an image download (20 seconds).
pub const IMAGE_TIMEOUT_SECS: u64 = 20;

/// Hard ceiling for a HEAD existence probe (5 seconds).
pub const PROBE_TIMEOUT_SECS: u64 = 5;

/// Largest response body accepted from any request (20 MiB).
pub const MAX_BODY_BYTES: u64 = 20 * 1024 * 1024;

/// Image bodies shorter than this are rejected before decode.
pub const MIN_IMAGE_BYTES: usize = 32;

/// Default minimum spacing between requests to the same domain.
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 500;

/// Default number of in-flight requests allowed per host.
pub const DEFAULT_PER_HOST_LIMIT: usize = 2;

/// Upper bound for the per-host concurrency cap.
pub const MAX_PER_HOST_LIMIT: usize = 8;

/// Warning threshold for cumulative rate limit delay per domain (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
