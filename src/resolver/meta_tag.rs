//! Meta-tag scrape: Open Graph and Twitter card image tags.

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::utils::absolutize_url;
use super::{ImageStrategy, ResolveContext, ResolveError, StrategyKind};

/// Tag names checked in order; each is matched on `property` or `name`.
pub const META_IMAGE_NAMES: [&str; 4] = [
    "og:image",
    "og:image:secure_url",
    "twitter:image",
    "twitter:image:src",
];

/// Returns the first non-empty image meta tag in `html`, absolutized against `base_url`.
#[must_use]
pub fn extract_meta_image(html: &str, base_url: &Url) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("meta[content]").ok()?;

    for wanted in META_IMAGE_NAMES {
        let hit = document.select(&selector).find_map(|element| {
            let el = element.value();
            let named = ["property", "name"]
                .iter()
                .any(|attr| el.attr(attr).is_some_and(|k| k.trim().eq_ignore_ascii_case(wanted)));
            if !named {
                return None;
            }
            el.attr("content").and_then(|c| absolutize_url(c, base_url))
        });
        if hit.is_some() {
            return hit;
        }
    }
    None
}

/// Reads image meta tags from the value's page.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaTagStrategy;

impl MetaTagStrategy {
    /// Creates the strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageStrategy for MetaTagStrategy {
    fn name(&self) -> &'static str {
        "meta-tag"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::MetaTag
    }

    #[tracing::instrument(skip(self, ctx), fields(strategy = "meta-tag", row = ctx.row_index()))]
    async fn try_resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<String>, ResolveError> {
        let Some(page) = ctx.page().await? else {
            return Ok(None);
        };
        let base = Url::parse(&page.final_url)
            .map_err(|e| ResolveError::parse(&page.final_url, "page URL", e))?;

        let found = extract_meta_image(&page.body, &base);
        debug!(found = found.is_some(), "meta tag scan complete");
        Ok(found)
    }
}
