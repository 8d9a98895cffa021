//! Search-engine fallback: ask a general image search for one hit.
//!
//! Speaks the DuckDuckGo image flow: a token request returns a `vqd` value,
//! then `i.js` returns JSON results. Only the first result is considered and
//! nothing checks that it actually shows the product.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::utils::compile_static_regex;
use super::vendor::Vendor;
use super::{ImageStrategy, ResolveContext, ResolveError, StrategyKind};
use crate::fetch::FetchKind;

/// Public DuckDuckGo endpoint.
pub const DEFAULT_SEARCH_BASE_URL: &str = "https://duckduckgo.com";

/// Results considered per query.
const MAX_RESULTS: usize = 1;

/// Words kept from a slug or free text.
const MAX_PHRASE_WORDS: usize = 8;

static VQD_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"vqd=["']?([0-9][0-9-]*)"#));

static FILE_EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"\.[A-Za-z0-9]{2,5}$"));

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    image: String,
}

/// Derives a short query: a product code, else the URL's last readable path
/// slug, else the first words of free text.
#[must_use]
pub fn search_phrase(value: &str, url: Option<&Url>, vendor: Option<&Vendor>) -> Option<String> {
    if let Some(code) = vendor
        .and_then(Vendor::cdn)
        .and_then(|rule| rule.candidate_codes(value).into_iter().next())
    {
        return Some(code);
    }

    match url {
        Some(url) => slug_phrase(url),
        None => first_words(value),
    }
}

fn slug_phrase(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    segments.iter().rev().find_map(|segment| {
        let decoded = urlencoding::decode(segment).ok()?;
        let stem = FILE_EXTENSION_RE.replace(&decoded, "");
        if !stem.chars().any(char::is_alphabetic) {
            return None;
        }
        let spaced: String = stem
            .chars()
            .map(|c| if matches!(c, '-' | '_' | '+') { ' ' } else { c })
            .collect();
        first_words(&spaced)
    })
}

fn first_words(text: &str) -> Option<String> {
    let phrase = text
        .split_whitespace()
        .take(MAX_PHRASE_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    (!phrase.is_empty()).then_some(phrase)
}

fn extract_vqd(body: &str) -> Option<&str> {
    VQD_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Queries an image search endpoint for the row's phrase.
#[derive(Debug, Clone)]
pub struct SearchEngineStrategy {
    base_url: String,
}

impl SearchEngineStrategy {
    /// Creates the strategy against `base_url` (no trailing slash needed).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// The endpoint queries go to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for SearchEngineStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_BASE_URL)
    }
}

#[async_trait]
impl ImageStrategy for SearchEngineStrategy {
    fn name(&self) -> &'static str {
        "search-engine"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::SearchEngine
    }

    #[tracing::instrument(skip(self, ctx), fields(strategy = "search-engine", row = ctx.row_index(), phrase))]
    async fn try_resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<String>, ResolveError> {
        let Some(phrase) = search_phrase(ctx.value(), ctx.url(), ctx.vendor()) else {
            debug!("no usable search phrase");
            return Ok(None);
        };
        tracing::Span::current().record("phrase", phrase.as_str());

        let query = urlencoding::encode(&phrase);
        let token_url = format!("{}/?q={query}&iax=images&ia=images", self.base_url);
        let token_page = ctx
            .fetcher()
            .fetch_text(&token_url, FetchKind::Page)
            .await?;
        let vqd = extract_vqd(&token_page.body)
            .ok_or_else(|| ResolveError::search(&phrase, "no vqd token in search response"))?;

        let api_url = format!(
            "{}/i.js?l=us-en&o=json&q={query}&vqd={vqd}&f=,,,&p=1",
            self.base_url
        );
        let results = ctx.fetcher().fetch_text(&api_url, FetchKind::Json).await?;
        let response: SearchResponse = serde_json::from_str(&results.body)
            .map_err(|e| ResolveError::parse(&api_url, "search results", e))?;

        let hit = response
            .results
            .into_iter()
            .take(MAX_RESULTS)
            .map(|hit| hit.image.trim().to_string())
            .find(|image| image.starts_with("http://") || image.starts_with("https://"));

        debug!(found = hit.is_some(), "search complete");
        Ok(hit)
    }
}
