//! Paced, retrying fetches on top of a [`FetchTransport`].
//!
//! Every request, probes and search calls included, goes through the same
//! gate: per-domain spacing from the [`RateLimiter`], a per-host slot from the
//! [`HostLimiter`], then the transport under a hard timeout. Failed GETs are
//! classified and retried per the [`RetryPolicy`]; HEAD probes get exactly
//! one attempt.
//!
//! With a cancel flag attached, every wait (pacing, the request itself,
//! back-off) ends early with [`FetchError::Cancelled`] once the flag is set.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, instrument};

use super::constants::{
    DEFAULT_REQUEST_DELAY_MS, IMAGE_TIMEOUT_SECS, MAX_BODY_BYTES, MIN_IMAGE_BYTES,
    PAGE_TIMEOUT_SECS, PROBE_TIMEOUT_SECS,
};
use super::error::FetchError;
use super::host_limiter::HostLimiter;
use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::transport::{FetchKind, FetchMethod, FetchRequest, FetchResponse, FetchTransport};

/// Hard per-request ceilings by request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    /// HTML pages and JSON API calls.
    pub page: Duration,
    /// Image downloads.
    pub image: Duration,
    /// HEAD existence probes.
    pub probe: Duration,
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            page: Duration::from_secs(PAGE_TIMEOUT_SECS),
            image: Duration::from_secs(IMAGE_TIMEOUT_SECS),
            probe: Duration::from_secs(PROBE_TIMEOUT_SECS),
        }
    }
}

/// A fetched text document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// URL after redirects; relative links resolve against this.
    pub final_url: String,
    /// Body decoded as UTF-8 (lossy).
    pub body: String,
}

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Resolves once `flag` is set.
pub(crate) async fn wait_for_cancel(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
    }
}

/// Shared fetch front end. Cheap to clone.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn FetchTransport>,
    retry_policy: RetryPolicy,
    rate_limiter: Arc<RateLimiter>,
    host_limiter: Arc<HostLimiter>,
    timeouts: FetchTimeouts,
    cancel: Option<Arc<AtomicBool>>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("retry_policy", &self.retry_policy)
            .field("rate_limiter", &self.rate_limiter)
            .field("host_limiter", &self.host_limiter)
            .field("timeouts", &self.timeouts)
            .field("cancellable", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Creates a fetcher with default pacing, retries and timeouts.
    #[must_use]
    pub fn new(transport: Arc<dyn FetchTransport>) -> Self {
        Self {
            transport,
            retry_policy: RetryPolicy::default(),
            rate_limiter: Arc::new(RateLimiter::new(Duration::from_millis(
                DEFAULT_REQUEST_DELAY_MS,
            ))),
            host_limiter: Arc::new(HostLimiter::default()),
            timeouts: FetchTimeouts::default(),
            cancel: None,
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Replaces the per-domain rate limiter.
    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Replaces the per-host concurrency limiter.
    #[must_use]
    pub fn with_host_limiter(mut self, host_limiter: Arc<HostLimiter>) -> Self {
        self.host_limiter = host_limiter;
        self
    }

    /// Replaces the request timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: FetchTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Abandons pending requests and back-off sleeps once `cancel` is set.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the configured timeouts.
    #[must_use]
    pub fn timeouts(&self) -> FetchTimeouts {
        self.timeouts
    }

    /// GETs `url` and returns the raw body of a 2xx response.
    ///
    /// # Errors
    ///
    /// Returns the last [`FetchError`] once retries are exhausted or the
    /// failure is not retryable.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &str, kind: FetchKind) -> Result<Vec<u8>, FetchError> {
        Ok(self.get_with_retry(url, kind).await?.body)
    }

    /// GETs `url` as text, keeping the post-redirect URL.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_text(&self, url: &str, kind: FetchKind) -> Result<FetchedPage, FetchError> {
        let response = self.get_with_retry(url, kind).await?;
        Ok(FetchedPage {
            final_url: response.final_url,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        })
    }

    /// GETs an HTML page.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.fetch_text(url, FetchKind::Page).await
    }

    /// GETs image bytes and rejects bodies that are obviously not images.
    ///
    /// # Errors
    ///
    /// [`FetchError::NotAnImage`] for text/JSON content types or tiny bodies,
    /// [`FetchError::TooLarge`] past the size cap, otherwise as
    /// [`fetch`](Self::fetch).
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get_with_retry(url, FetchKind::Image).await?;
        check_image_response(url, &response)?;
        Ok(response.body)
    }

    /// HEADs `url` once with the probe timeout. `Ok(true)` on any 2xx.
    ///
    /// # Errors
    ///
    /// Transport failures only; error statuses are `Ok(false)`.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn probe(&self, url: &str) -> Result<bool, FetchError> {
        let request = FetchRequest {
            method: FetchMethod::Head,
            url: url.to_string(),
            kind: FetchKind::Image,
            timeout: self.timeouts.probe,
        };
        let response = self.send_once(&request).await?;
        debug!(status = response.status, "probe response");
        Ok(response.is_success())
    }

    fn timeout_for(&self, kind: FetchKind) -> Duration {
        match kind {
            FetchKind::Page | FetchKind::Json => self.timeouts.page,
            FetchKind::Image => self.timeouts.image,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Runs `work` unless the cancel flag fires first.
    async fn unless_cancelled<T>(&self, work: impl Future<Output = T>) -> Option<T> {
        match &self.cancel {
            None => Some(work.await),
            Some(flag) => tokio::select! {
                biased;
                () = wait_for_cancel(flag) => None,
                output = work => Some(output),
            },
        }
    }

    async fn send_once(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        if self.is_cancelled() {
            return Err(FetchError::cancelled(&request.url));
        }
        let send = async {
            self.rate_limiter.acquire(&request.url).await;
            let _permit = self.host_limiter.acquire(&request.url).await;

            match tokio::time::timeout(request.timeout, self.transport.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::timeout(&request.url)),
            }
        };
        self.unless_cancelled(send)
            .await
            .unwrap_or_else(|| Err(FetchError::cancelled(&request.url)))
    }

    async fn get_with_retry(&self, url: &str, kind: FetchKind) -> Result<FetchResponse, FetchError> {
        let request = FetchRequest {
            method: FetchMethod::Get,
            url: url.to_string(),
            kind,
            timeout: self.timeout_for(kind),
        };
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, "attempting fetch");

            let error = match self.send_once(&request).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => FetchError::http_status_with_retry_after(
                    url,
                    response.status,
                    response.retry_after,
                ),
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            let retry_after_delay = if failure_type == FailureType::RateLimited {
                self.retry_after_delay(&error, url)
            } else {
                None
            };

            match self.retry_policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay: backoff_delay,
                    attempt: next_attempt,
                } => {
                    let delay = retry_after_delay.unwrap_or(backoff_delay);
                    info!(
                        url,
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        using_retry_after = retry_after_delay.is_some(),
                        error = %error,
                        "retrying fetch"
                    );
                    if self
                        .unless_cancelled(tokio::time::sleep(delay))
                        .await
                        .is_none()
                    {
                        debug!(url, attempts = attempt, "cancelled during back-off");
                        return Err(FetchError::cancelled(url));
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url, %reason, attempts = attempt, "not retrying fetch");
                    return Err(error);
                }
            }
        }
    }

    fn retry_after_delay(&self, error: &FetchError, url: &str) -> Option<Duration> {
        let FetchError::HttpStatus {
            retry_after: Some(header),
            ..
        } = error
        else {
            return None;
        };
        let delay = parse_retry_after(header)?;
        self.rate_limiter.record_rate_limit(url, delay);
        debug!(url, retry_after = %header, delay_ms = delay.as_millis(), "using Retry-After delay");
        Some(delay)
    }
}

fn check_image_response(url: &str, response: &FetchResponse) -> Result<(), FetchError> {
    if let Some(content_type) = response.content_type.as_deref() {
        let lowered = content_type.to_ascii_lowercase();
        if lowered.starts_with("text/") || lowered.contains("json") {
            return Err(FetchError::not_an_image(
                url,
                format!("content type {content_type}"),
            ));
        }
    }
    if response.body.len() < MIN_IMAGE_BYTES {
        return Err(FetchError::not_an_image(
            url,
            format!("body is only {} bytes", response.body.len()),
        ));
    }
    if response.body.len() as u64 > MAX_BODY_BYTES {
        return Err(FetchError::too_large(url, MAX_BODY_BYTES));
    }
    Ok(())
}
