//! Vendor-CDN-guess strategy.
//!
//! For vendors whose catalog entry carries a CDN rule, product codes are
//! pulled out of the value and substituted into the rule's URL templates.
//! Candidates are HEAD-probed in preference order; the first 2xx wins.
//! Image bytes are never downloaded here.

use async_trait::async_trait;
use tracing::debug;

use super::{ImageStrategy, ResolveContext, ResolveError, StrategyKind};

/// Guesses CDN image URLs from product codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct VendorCdnStrategy;

impl VendorCdnStrategy {
    /// Creates the strategy. Rules come from the context's vendor entry.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageStrategy for VendorCdnStrategy {
    fn name(&self) -> &'static str {
        "vendor-cdn-guess"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::VendorCdnGuess
    }

    #[tracing::instrument(skip(self, ctx), fields(strategy = "vendor-cdn-guess", row = ctx.row_index()))]
    async fn try_resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<String>, ResolveError> {
        let Some(rule) = ctx.vendor().and_then(|v| v.cdn()) else {
            return Ok(None);
        };

        let candidates = rule.candidate_urls(ctx.value());
        debug!(candidates = candidates.len(), "probing CDN candidates");

        for candidate in candidates {
            match ctx.fetcher().probe(&candidate).await {
                Ok(true) => return Ok(Some(candidate)),
                Ok(false) => debug!(url = %candidate, "CDN candidate missing"),
                Err(error) => debug!(url = %candidate, error = %error, "CDN probe failed"),
            }
        }
        Ok(None)
    }
}
