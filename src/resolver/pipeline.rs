//! Ordered strategy chain with skip policy and first-hit-wins loop.
//!
//! The [`ResolutionPipeline`] holds strategies sorted by [`StrategyKind`].
//! Per value it builds one [`ResolveContext`], decides for each strategy
//! whether policy skips it, and returns the first non-empty URL. Strategy
//! errors are logged and treated as "no result".

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    DirectLinkStrategy, ImageStrategy, MetaTagStrategy, ResolveContext, ResolvedImage,
    SearchEngineStrategy, StrategyKind, StructuredDataStrategy, VendorCatalog, VendorCdnStrategy,
};
use crate::fetch::{FetchError, Fetcher};

/// When the search-engine fallback may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchFallback {
    /// Whenever every earlier strategy came up empty.
    #[default]
    Always,
    /// Only when no page scrape was attempted for the value.
    WhenScrapingSkipped,
    /// Never.
    Never,
}

impl SearchFallback {
    /// Stable kebab-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::WhenScrapingSkipped => "when-scraping-skipped",
            Self::Never => "never",
        }
    }
}

impl fmt::Display for SearchFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "when-scraping-skipped" | "when_scraping_skipped" => Ok(Self::WhenScrapingSkipped),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "invalid search fallback '{other}' (expected always, when-scraping-skipped or never)"
            )),
        }
    }
}

/// Why a strategy was not run for a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipPolicy {
    /// Strategy needs an absolute http(s) URL and the value is not one.
    NotAUrl,
    /// Catalog marks the domain no-scrape.
    NoScrapeDomain,
    /// Search fallback is configured off.
    SearchDisabled,
    /// Search runs only when scraping was skipped, and it was not.
    PageWasScraped,
}

impl fmt::Display for SkipPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotAUrl => "value is not a URL",
            Self::NoScrapeDomain => "domain is no-scrape",
            Self::SearchDisabled => "search disabled",
            Self::PageWasScraped => "page was scraped",
        };
        f.write_str(text)
    }
}

/// What one strategy did for a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "kebab-case")]
pub enum AttemptOutcome {
    /// Produced this URL.
    Found(String),
    /// Ran and found nothing.
    Empty,
    /// Ran and hit a soft error.
    Failed(String),
    /// Not run.
    Skipped(SkipPolicy),
}

/// One entry in a [`ResolutionTrace`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyAttempt {
    /// Strategy slot.
    pub strategy: StrategyKind,
    /// Result of the slot.
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Per-strategy record of one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionTrace {
    /// The value that was resolved (trimmed).
    pub value: String,
    /// Attempts in chain order, up to and including the winner.
    pub attempts: Vec<StrategyAttempt>,
    /// The winner, if any.
    pub resolved: Option<ResolvedImage>,
    /// Why the value's page could not be fetched, when that was tried and failed.
    #[serde(skip)]
    pub page_error: Option<FetchError>,
}

impl ResolutionTrace {
    fn empty(value: &str) -> Self {
        Self {
            value: value.to_string(),
            attempts: Vec::new(),
            resolved: None,
            page_error: None,
        }
    }

    /// Strategies that actually ran (skipped ones excluded).
    #[must_use]
    pub fn attempted(&self) -> Vec<StrategyKind> {
        self.attempts
            .iter()
            .filter(|a| !matches!(a.outcome, AttemptOutcome::Skipped(_)))
            .map(|a| a.strategy)
            .collect()
    }
}

/// Runs strategies in priority order for one value at a time.
///
/// Holds no per-row state; each call builds its own [`ResolveContext`].
pub struct ResolutionPipeline {
    strategies: Vec<Box<dyn ImageStrategy>>,
    fetcher: Fetcher,
    catalog: Arc<VendorCatalog>,
    search_fallback: SearchFallback,
}

impl ResolutionPipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new(fetcher: Fetcher, catalog: Arc<VendorCatalog>) -> Self {
        Self {
            strategies: Vec::new(),
            fetcher,
            catalog,
            search_fallback: SearchFallback::default(),
        }
    }

    /// Creates a pipeline with all five built-in strategies.
    #[must_use]
    pub fn standard(
        fetcher: Fetcher,
        catalog: Arc<VendorCatalog>,
        search_base_url: impl Into<String>,
    ) -> Self {
        let mut pipeline = Self::new(fetcher, Arc::clone(&catalog));
        pipeline.register(Box::new(DirectLinkStrategy::new(catalog)));
        pipeline.register(Box::new(VendorCdnStrategy::new()));
        pipeline.register(Box::new(MetaTagStrategy::new()));
        pipeline.register(Box::new(StructuredDataStrategy::new()));
        pipeline.register(Box::new(SearchEngineStrategy::new(search_base_url)));
        pipeline
    }

    /// Sets the search-fallback policy.
    #[must_use]
    pub fn with_search_fallback(mut self, policy: SearchFallback) -> Self {
        self.search_fallback = policy;
        self
    }

    /// Adds a strategy, keeping the list sorted by kind (stable within a kind).
    #[tracing::instrument(skip(self, strategy), fields(strategy_name))]
    pub fn register(&mut self, strategy: Box<dyn ImageStrategy>) {
        tracing::Span::current().record("strategy_name", strategy.name());
        debug!(name = strategy.name(), kind = %strategy.kind(), "Registering strategy");
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.kind());
    }

    /// Number of registered strategies.
    #[must_use]
    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// True if no strategies are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// The configured search-fallback policy.
    #[must_use]
    pub fn search_fallback(&self) -> SearchFallback {
        self.search_fallback
    }

    /// The catalog strategies classify against.
    #[must_use]
    pub fn catalog(&self) -> &VendorCatalog {
        &self.catalog
    }

    /// The fetcher strategies use.
    #[must_use]
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Resolves `value` to an image URL, or `None` if every strategy came up empty.
    pub async fn resolve(&self, row_index: usize, value: &str) -> Option<ResolvedImage> {
        self.resolve_traced(row_index, value).await.resolved
    }

    /// Like [`resolve`](Self::resolve), returning every attempt.
    #[tracing::instrument(skip(self, value), fields(row = row_index))]
    pub async fn resolve_traced(&self, row_index: usize, value: &str) -> ResolutionTrace {
        let value = value.trim();
        let mut trace = ResolutionTrace::empty(value);
        if value.is_empty() {
            debug!("empty value; nothing to resolve");
            return trace;
        }

        let ctx = ResolveContext::new(row_index, value, &self.fetcher, &self.catalog);
        let mut scrape_attempted = false;

        for strategy in &self.strategies {
            let kind = strategy.kind();
            if let Some(policy) = self.skip_policy(kind, &ctx, scrape_attempted) {
                debug!(strategy = strategy.name(), reason = %policy, "Skipping strategy");
                trace.attempts.push(StrategyAttempt {
                    strategy: kind,
                    outcome: AttemptOutcome::Skipped(policy),
                });
                continue;
            }
            if kind.scrapes_page() {
                scrape_attempted = true;
            }

            debug!(strategy = strategy.name(), "Trying strategy");
            let outcome = match strategy.try_resolve(&ctx).await {
                Ok(Some(url)) if !url.trim().is_empty() => {
                    AttemptOutcome::Found(url.trim().to_string())
                }
                Ok(_) => AttemptOutcome::Empty,
                Err(error) => {
                    warn!(strategy = strategy.name(), error = %error, "Strategy returned error");
                    AttemptOutcome::Failed(error.to_string())
                }
            };

            let found = match &outcome {
                AttemptOutcome::Found(url) => Some(url.clone()),
                _ => None,
            };
            trace.attempts.push(StrategyAttempt {
                strategy: kind,
                outcome,
            });

            if let Some(image_url) = found {
                info!(strategy = strategy.name(), url = %image_url, "Resolution successful");
                trace.resolved = Some(ResolvedImage {
                    source_row_index: row_index,
                    image_url,
                    strategy_used: kind,
                });
                return trace;
            }
        }

        trace.page_error = ctx.page_error().cloned();
        debug!(attempted = trace.attempted().len(), "No strategy produced an image");
        trace
    }

    fn skip_policy(
        &self,
        kind: StrategyKind,
        ctx: &ResolveContext<'_>,
        scrape_attempted: bool,
    ) -> Option<SkipPolicy> {
        if kind.needs_url() && ctx.url().is_none() {
            return Some(SkipPolicy::NotAUrl);
        }
        if kind.scrapes_page() && ctx.is_no_scrape() {
            return Some(SkipPolicy::NoScrapeDomain);
        }
        if kind == StrategyKind::SearchEngine {
            match self.search_fallback {
                SearchFallback::Always => {}
                SearchFallback::Never => return Some(SkipPolicy::SearchDisabled),
                SearchFallback::WhenScrapingSkipped if scrape_attempted => {
                    return Some(SkipPolicy::PageWasScraped);
                }
                SearchFallback::WhenScrapingSkipped => {}
            }
        }
        None
    }
}

impl fmt::Debug for ResolutionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("ResolutionPipeline")
            .field("strategy_count", &self.strategies.len())
            .field("strategies", &names)
            .field("search_fallback", &self.search_fallback)
            .finish_non_exhaustive()
    }
}
