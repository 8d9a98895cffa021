//! Structured-data scrape: `image` fields in JSON-LD blocks.
//!
//! Blocks are scanned in document order. Inside a block the search is
//! depth-first in key order, descending into `@graph` and arrays, and the
//! first object with a usable `image` field wins. Unparseable blocks are
//! skipped.

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::utils::absolutize_url;
use super::{ImageStrategy, ResolveContext, ResolveError, StrategyKind};

/// Returns the first JSON-LD image URL in `html`, absolutized against `base_url`.
#[must_use]
pub fn extract_json_ld_image(html: &str, base_url: &Url) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;

    for script in document.select(&selector) {
        let text: String = script.text().collect();
        let value = match serde_json::from_str::<Value>(text.trim()) {
            Ok(value) => value,
            Err(error) => {
                debug!(error = %error, "skipping malformed JSON-LD block");
                continue;
            }
        };
        if let Some(raw) = find_image(&value)
            && let Some(url) = absolutize_url(&raw, base_url)
        {
            return Some(url);
        }
    }
    None
}

fn find_image(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(url) = map.get("image").and_then(image_field_url) {
                return Some(url);
            }
            map.values().find_map(find_image)
        }
        Value::Array(items) => items.iter().find_map(find_image),
        _ => None,
    }
}

/// string → itself; list → first element; object → its `url`.
fn image_field_url(field: &Value) -> Option<String> {
    match field {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => items.first().and_then(image_field_url),
        Value::Object(obj) => obj.get("url").and_then(image_field_url),
        _ => None,
    }
}

/// Reads JSON-LD `image` fields from the value's page.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredDataStrategy;

impl StructuredDataStrategy {
    /// Creates the strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageStrategy for StructuredDataStrategy {
    fn name(&self) -> &'static str {
        "structured-data"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::StructuredData
    }

    #[tracing::instrument(skip(self, ctx), fields(strategy = "structured-data", row = ctx.row_index()))]
    async fn try_resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<String>, ResolveError> {
        let Some(page) = ctx.page().await? else {
            return Ok(None);
        };
        let base = Url::parse(&page.final_url)
            .map_err(|e| ResolveError::parse(&page.final_url, "page URL", e))?;

        let found = extract_json_ld_image(&page.body, &base);
        debug!(found = found.is_some(), "JSON-LD scan complete");
        Ok(found)
    }
}
