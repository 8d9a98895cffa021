//! Direct-link strategy: the value already is an image URL.
//!
//! Accepts the value verbatim when it carries a known image extension or a
//! direct-image CDN host marker. Never touches the network.

use std::sync::Arc;

use async_trait::async_trait;

use super::{ImageStrategy, ResolveContext, ResolveError, StrategyKind, VendorCatalog};

/// Passes image-looking values through unchanged.
#[derive(Debug, Clone)]
pub struct DirectLinkStrategy {
    catalog: Arc<VendorCatalog>,
}

impl DirectLinkStrategy {
    /// Creates the strategy over `catalog`'s extension and host-marker lists.
    #[must_use]
    pub fn new(catalog: Arc<VendorCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ImageStrategy for DirectLinkStrategy {
    fn name(&self) -> &'static str {
        "direct-link"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectLink
    }

    #[tracing::instrument(skip(self, ctx), fields(strategy = "direct-link", row = ctx.row_index()))]
    async fn try_resolve(&self, ctx: &ResolveContext<'_>) -> Result<Option<String>, ResolveError> {
        let value = ctx.value().trim();
        Ok(self
            .catalog
            .looks_like_image_url(value)
            .then(|| value.to_string()))
    }
}
