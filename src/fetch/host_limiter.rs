//! Per-host in-flight request cap.
//!
//! Row concurrency can put several rows on the same storefront at once; the
//! host limiter keeps the number of simultaneous requests to one host below
//! a small ceiling regardless of how many rows are running.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument};

use super::constants::{DEFAULT_PER_HOST_LIMIT, MAX_PER_HOST_LIMIT};
use super::rate_limiter::extract_domain;

/// Hands out per-host semaphore permits.
#[derive(Debug)]
pub struct HostLimiter {
    per_host: usize,
    hosts: DashMap<String, Arc<Semaphore>>,
}

impl Default for HostLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PER_HOST_LIMIT)
    }
}

impl HostLimiter {
    /// Creates a limiter allowing `per_host` concurrent requests to each host.
    ///
    /// The value is clamped to `1..=8`.
    #[must_use]
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host: per_host.clamp(1, MAX_PER_HOST_LIMIT),
            hosts: DashMap::new(),
        }
    }

    /// Returns the effective per-host cap.
    #[must_use]
    pub fn per_host(&self) -> usize {
        self.per_host
    }

    /// Waits for a slot on `url`'s host. The slot is released when the permit drops.
    #[instrument(skip(self), fields(domain))]
    pub async fn acquire(&self, url: &str) -> Option<OwnedSemaphorePermit> {
        let domain = extract_domain(url);
        tracing::Span::current().record("domain", &domain);

        let semaphore = self
            .hosts
            .entry(domain)
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
            .clone();

        if semaphore.available_permits() == 0 {
            debug!("host at concurrency cap, waiting");
        }

        // Only fails if the semaphore is closed, which this type never does.
        semaphore.acquire_owned().await.ok()
    }
}
