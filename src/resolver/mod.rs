//! Image-resolution fallback pipeline.
//!
//! Turns an arbitrary cell value (product page URL, image URL, or free text)
//! into a concrete image URL by running strategies in fixed priority order
//! and stopping at the first hit.
//!
//! # Architecture
//!
//! - [`ImageStrategy`] - Async trait each strategy implements
//! - [`ResolutionPipeline`] - Ordered strategy list plus skip policy
//! - [`ResolveContext`] - Per-call state, including the shared page cache
//! - [`VendorCatalog`] - Per-vendor data (image hosts, CDN rules, scrape policy)
//! - [`DirectLinkStrategy`], [`VendorCdnStrategy`], [`MetaTagStrategy`],
//!   [`StructuredDataStrategy`], [`SearchEngineStrategy`] - the built-in chain
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sheet_images_core::fetch::{Fetcher, HttpTransport};
//! use sheet_images_core::resolver::{ResolutionPipeline, VendorCatalog, DEFAULT_SEARCH_BASE_URL};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Fetcher::new(Arc::new(HttpTransport::new()?));
//! let catalog = Arc::new(VendorCatalog::embedded()?);
//! let pipeline = ResolutionPipeline::standard(fetcher, catalog, DEFAULT_SEARCH_BASE_URL);
//!
//! if let Some(found) = pipeline.resolve(0, "https://shop.example/lamp").await {
//!     println!("{} via {}", found.image_url, found.strategy_used);
//! }
//! # Ok(())
//! # }
//! ```

mod cdn;
mod direct;
mod error;
mod meta_tag;
mod pipeline;
mod search;
mod structured_data;
mod utils;
pub mod vendor;

pub use cdn::VendorCdnStrategy;
pub use direct::DirectLinkStrategy;
pub use error::ResolveError;
pub use meta_tag::{META_IMAGE_NAMES, MetaTagStrategy, extract_meta_image};
pub use pipeline::{
    AttemptOutcome, ResolutionPipeline, ResolutionTrace, SearchFallback, SkipPolicy,
    StrategyAttempt,
};
pub use search::{DEFAULT_SEARCH_BASE_URL, SearchEngineStrategy, search_phrase};
pub use structured_data::{StructuredDataStrategy, extract_json_ld_image};
pub use utils::{absolutize_url, canonical_host, host_in_domain, parse_http_url};
pub use vendor::{CatalogError, CdnRule, ScrapePolicy, Vendor, VendorCatalog};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::warn;
use url::Url;

use crate::fetch::{FetchError, FetchedPage, Fetcher};

/// The built-in strategies, in priority order.
///
/// Derives `Ord` so that sorting puts `DirectLink` first and `SearchEngine` last.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Value already is an image URL.
    DirectLink,
    /// HEAD-probed guess from product codes and CDN templates.
    VendorCdnGuess,
    /// `og:image` / `twitter:image` meta tags.
    MetaTag,
    /// JSON-LD `image` fields.
    StructuredData,
    /// General image search.
    SearchEngine,
}

impl StrategyKind {
    /// Stable kebab-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectLink => "direct-link",
            Self::VendorCdnGuess => "vendor-cdn-guess",
            Self::MetaTag => "meta-tag",
            Self::StructuredData => "structured-data",
            Self::SearchEngine => "search-engine",
        }
    }

    /// True for strategies that fetch the value's page.
    #[must_use]
    pub fn scrapes_page(self) -> bool {
        matches!(self, Self::MetaTag | Self::StructuredData)
    }

    /// True for strategies that need the value to be an absolute http(s) URL.
    #[must_use]
    pub fn needs_url(self) -> bool {
        matches!(self, Self::VendorCdnGuess | Self::MetaTag | Self::StructuredData)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete image URL for a row, and how it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedImage {
    /// Zero-based row index the value came from.
    pub source_row_index: usize,
    /// Absolute image URL.
    pub image_url: String,
    /// Strategy that produced it.
    pub strategy_used: StrategyKind,
}

/// State for one resolution call, shared by every strategy in the chain.
pub struct ResolveContext<'a> {
    row_index: usize,
    value: &'a str,
    url: Option<Url>,
    vendor: Option<&'a Vendor>,
    fetcher: &'a Fetcher,
    page: OnceCell<Result<FetchedPage, FetchError>>,
}

impl<'a> ResolveContext<'a> {
    /// Builds a context for `value`, classifying it against `catalog`.
    #[must_use]
    pub fn new(
        row_index: usize,
        value: &'a str,
        fetcher: &'a Fetcher,
        catalog: &'a VendorCatalog,
    ) -> Self {
        let url = parse_http_url(value);
        let vendor = url.as_ref().and_then(|u| catalog.vendor_for_url(u));
        Self {
            row_index,
            value,
            url,
            vendor,
            fetcher,
            page: OnceCell::new(),
        }
    }

    /// Row index being resolved.
    #[must_use]
    pub fn row_index(&self) -> usize {
        self.row_index
    }

    /// The trimmed input value.
    #[must_use]
    pub fn value(&self) -> &str {
        self.value
    }

    /// The value as a URL, when it is an absolute http(s) URL.
    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Catalog entry for the value's host.
    #[must_use]
    pub fn vendor(&self) -> Option<&Vendor> {
        self.vendor
    }

    /// Fetcher for any network access.
    #[must_use]
    pub fn fetcher(&self) -> &Fetcher {
        self.fetcher
    }

    /// True when the catalog forbids scraping this value's domain.
    #[must_use]
    pub fn is_no_scrape(&self) -> bool {
        self.vendor
            .is_some_and(|v| v.scrape() == ScrapePolicy::NoScrape)
    }

    /// The value's page, fetched at most once per context.
    ///
    /// `Ok(None)` for non-URL values. A failed fetch is cached too, so every
    /// page scraper reports the same error without refetching.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Fetch`] when the page request failed.
    pub async fn page(&self) -> Result<Option<&FetchedPage>, ResolveError> {
        let Some(url) = self.url.as_ref() else {
            return Ok(None);
        };
        let cached = self
            .page
            .get_or_init(|| async {
                let result = self.fetcher.fetch_page(url.as_str()).await;
                if let Err(error) = &result {
                    warn!(
                        row = self.row_index,
                        url = %url,
                        error = %error,
                        "page fetch failed"
                    );
                }
                result
            })
            .await;
        match cached {
            Ok(page) => Ok(Some(page)),
            Err(error) => Err(ResolveError::Fetch(error.clone())),
        }
    }

    /// The page fetch error, if the page was requested and the request failed.
    #[must_use]
    pub fn page_error(&self) -> Option<&FetchError> {
        self.page.get().and_then(|result| result.as_ref().err())
    }
}

impl fmt::Debug for ResolveContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveContext")
            .field("row_index", &self.row_index)
            .field("value", &self.value)
            .field("vendor", &self.vendor.map(Vendor::domain))
            .field("page_cached", &self.page.initialized())
            .finish_non_exhaustive()
    }
}

/// One link in the fallback chain.
///
/// Uses `async_trait` so strategies can live in a `Vec<Box<dyn ImageStrategy>>`.
#[async_trait]
pub trait ImageStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Which built-in slot this strategy fills; decides order and skip policy.
    fn kind(&self) -> StrategyKind;

    /// Looks for an image URL. `Ok(None)` means "nothing here"; errors are soft.
    async fn try_resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<String>, ResolveError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_ordering() {
        assert!(StrategyKind::DirectLink < StrategyKind::VendorCdnGuess);
        assert!(StrategyKind::VendorCdnGuess < StrategyKind::MetaTag);
        assert!(StrategyKind::MetaTag < StrategyKind::StructuredData);
        assert!(StrategyKind::StructuredData < StrategyKind::SearchEngine);
    }

    #[test]
    fn test_strategy_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&StrategyKind::VendorCdnGuess).unwrap();
        assert_eq!(json, "\"vendor-cdn-guess\"");
        assert_eq!(StrategyKind::SearchEngine.to_string(), "search-engine");
    }

    #[test]
    fn test_strategy_kind_classification() {
        assert!(StrategyKind::MetaTag.scrapes_page());
        assert!(StrategyKind::StructuredData.scrapes_page());
        assert!(!StrategyKind::VendorCdnGuess.scrapes_page());
        assert!(StrategyKind::VendorCdnGuess.needs_url());
        assert!(!StrategyKind::DirectLink.needs_url());
        assert!(!StrategyKind::SearchEngine.needs_url());
    }
}
