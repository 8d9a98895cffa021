//! Per-domain request pacing.
//!
//! [`RateLimiter`] enforces a minimum gap between two requests to the same
//! domain. Requests to different domains never wait on each other. Server
//! back-off hints (Retry-After) are accumulated per domain so sustained
//! throttling shows up in the logs.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sheet_images_core::fetch::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_millis(500));
//!
//! limiter.acquire("https://www.next.co.uk/style/st123").await;   // immediate
//! limiter.acquire("https://www.next.co.uk/style/st456").await;   // waits ~500ms
//! limiter.acquire("https://duckduckgo.com/?q=lamp").await;       // immediate
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Per-domain rate limiter, shared across row tasks behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    delay: Duration,
    disabled: bool,
    // Arc so the DashMap shard lock is released before awaiting the inner Mutex.
    domains: DashMap<String, Arc<DomainState>>,
}

#[derive(Debug)]
struct DomainState {
    /// `None` until the first request to the domain.
    last_request: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl DomainState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

impl RateLimiter {
    /// Creates a limiter that spaces same-domain requests by `delay`.
    ///
    /// A zero delay yields a disabled limiter.
    #[must_use]
    #[instrument(skip_all, fields(delay_ms = delay.as_millis()))]
    pub fn new(delay: Duration) -> Self {
        if delay.is_zero() {
            return Self::disabled();
        }
        debug!("creating rate limiter");
        Self {
            delay,
            disabled: false,
            domains: DashMap::new(),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            delay: Duration::ZERO,
            disabled: true,
            domains: DashMap::new(),
        }
    }

    /// Returns whether pacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured same-domain gap.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits until a request to `url`'s domain is allowed, then stamps it.
    ///
    /// The first request to any domain proceeds immediately.
    #[instrument(skip(self), fields(domain))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let domain = extract_domain(url);
        tracing::Span::current().record("domain", &domain);

        let state = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(DomainState::new()))
            .clone();

        let mut last_request = state.last_request.lock().await;

        if let Some(previous) = *last_request {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                let wait = self.delay.saturating_sub(elapsed);
                let cumulative = state.add_cumulative_delay(wait);

                debug!(
                    domain = %domain,
                    delay_ms = wait.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        domain = %domain,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting - many rows point at this site"
                    );
                }

                tokio::time::sleep(wait).await;
            }
        }

        *last_request = Some(Instant::now());
    }

    /// Records a server-mandated delay (Retry-After) against `url`'s domain.
    #[instrument(skip(self), fields(domain))]
    pub fn record_rate_limit(&self, url: &str, delay: Duration) {
        let domain = extract_domain(url);
        tracing::Span::current().record("domain", &domain);

        let state = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(DomainState::new()));
        let cumulative = state.add_cumulative_delay(delay);

        debug!(
            domain = %domain,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                domain = %domain,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - site may be throttling this client"
            );
        }
    }
}

/// Extracts the lowercased host from a URL, or `"unknown"` when unparseable.
///
/// ```
/// use sheet_images_core::fetch::rate_limiter::extract_domain;
///
/// assert_eq!(extract_domain("https://WWW.Next.co.uk/x"), "www.next.co.uk");
/// assert_eq!(extract_domain("http://localhost:8080/x"), "localhost");
/// assert_eq!(extract_domain("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After value (integer seconds or HTTP-date), capped at one hour.
///
/// Past dates yield zero; negative or unparseable values yield `None`.
///
/// ```
/// use std::time::Duration;
/// use sheet_images_core::fetch::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(cap_retry_after(duration));
    }

    let Ok(when) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };

    match when.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(cap_retry_after(duration)),
        Err(_) => Some(Duration::ZERO),
    }
}

fn cap_retry_after(duration: Duration) -> Duration {
    if duration > MAX_RETRY_AFTER {
        warn!(
            delay_secs = duration.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        MAX_RETRY_AFTER
    } else {
        duration
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== RateLimiter Tests ====================

    #[test]
    fn test_rate_limiter_zero_delay_is_disabled() {
        let limiter = RateLimiter::new(Duration::ZERO);
        assert!(limiter.is_disabled());
        assert_eq!(limiter.delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_rate_limiter_disabled_no_delay() {
        tokio::time::pause();
        let limiter = RateLimiter::disabled();
        let start = Instant::now();

        limiter.acquire("https://example.com/1").await;
        limiter.acquire("https://example.com/2").await;

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_rate_limiter_delays_same_domain() {
        tokio::time::pause();
        let limiter = RateLimiter::new(Duration::from_millis(500));
        let start = Instant::now();

        limiter.acquire("https://shop.test/a").await;
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.acquire("https://shop.test/b").await;
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_rate_limiter_different_domains_independent() {
        tokio::time::pause();
        let limiter = RateLimiter::new(Duration::from_secs(1));

        limiter.acquire("https://a.test/1").await;
        let start = Instant::now();
        limiter.acquire("https://b.test/1").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    // ==================== extract_domain Tests ====================

    #[test]
    fn test_extract_domain_variants() {
        assert_eq!(extract_domain("https://Example.COM/Path"), "example.com");
        assert_eq!(extract_domain("https://example.com:8080/p"), "example.com");
        assert_eq!(extract_domain("https://192.168.1.1/f"), "192.168.1.1");
        assert_eq!(extract_domain(""), "unknown");
    }

    // ==================== parse_retry_after Tests ====================

    #[test]
    fn test_parse_retry_after_seconds_and_whitespace() {
        assert_eq!(parse_retry_after("  30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_rejects_negative_and_garbage() {
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        assert_eq!(
            parse_retry_after("Wed, 01 Jan 2020 00:00:00 GMT"),
            Some(Duration::ZERO)
        );

        let future = httpdate::fmt_http_date(std::time::SystemTime::now() + Duration::from_secs(60));
        let parsed = parse_retry_after(&future).unwrap();
        assert!(parsed >= Duration::from_secs(55) && parsed <= Duration::from_secs(61));
    }

    // ==================== record_rate_limit Tests ====================

    #[test]
    fn test_record_rate_limit_tracks_cumulative_per_domain() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.record_rate_limit("https://a.test/1", Duration::from_secs(5));
        limiter.record_rate_limit("https://a.test/2", Duration::from_secs(10));
        limiter.record_rate_limit("https://b.test/1", Duration::from_secs(2));

        let a = limiter.domains.get("a.test").unwrap();
        let b = limiter.domains.get("b.test").unwrap();
        assert_eq!(a.cumulative_delay_ms.load(Ordering::SeqCst), 15_000);
        assert_eq!(b.cumulative_delay_ms.load(Ordering::SeqCst), 2_000);
    }
}
