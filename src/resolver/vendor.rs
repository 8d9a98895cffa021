//! Per-vendor configuration as data.
//!
//! A [`VendorCatalog`] answers three questions for the pipeline:
//! - does a value already point at an image (extension or CDN host marker)?
//! - may this domain's pages be scraped?
//! - can a CDN image URL be guessed from product codes in the value?
//!
//! The built-in catalog is embedded JSON; a replacement can be loaded from disk.
//!
//! ```json
//! {
//!   "image_extensions": ["png", "jpg"],
//!   "direct_host_markers": ["etsystatic"],
//!   "vendors": [
//!     { "domain": "next.co.uk", "scrape": "no-scrape",
//!       "cdn": { "code_pattern": "(?i)\\b([a-z]\\d{5})\\b",
//!                "templates": ["https://xcdn.next.co.uk/.../{code}.jpg"] } }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::utils::{canonical_host, host_in_domain, parse_http_url};

const DEFAULT_CATALOG_JSON: &str = include_str!("default_vendors.json");

/// Errors loading or validating a vendor catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("cannot read vendor catalog {path}: {source}\n  Suggestion: check the --vendors path")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The catalog is not valid JSON for the expected shape.
    #[error("invalid vendor catalog JSON: {reason}")]
    Parse {
        /// Parser message.
        reason: String,
    },

    /// A vendor's code pattern does not compile.
    #[error("invalid code pattern for {domain}: {reason}")]
    InvalidPattern {
        /// Vendor domain.
        domain: String,
        /// Regex compiler message.
        reason: String,
    },

    /// A CDN template has no `{code}`/`{CODE}` placeholder.
    #[error("CDN template for {domain} has no {{code}} placeholder: {template}")]
    InvalidTemplate {
        /// Vendor domain.
        domain: String,
        /// Offending template.
        template: String,
    },
}

/// Whether a domain's pages may be fetched and scraped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScrapePolicy {
    /// Meta-tag and structured-data strategies may run.
    #[default]
    Allow,
    /// Bot-protected: never fetch the page.
    NoScrape,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default = "default_extensions")]
    image_extensions: Vec<String>,
    #[serde(default)]
    direct_host_markers: Vec<String>,
    #[serde(default)]
    vendors: Vec<VendorFile>,
}

#[derive(Debug, Deserialize)]
struct VendorFile {
    domain: String,
    #[serde(default)]
    scrape: ScrapePolicy,
    #[serde(default)]
    cdn: Option<CdnRuleFile>,
}

#[derive(Debug, Deserialize)]
struct CdnRuleFile {
    code_pattern: String,
    templates: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "webp"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// A compiled CDN guessing rule.
#[derive(Debug, Clone)]
pub struct CdnRule {
    pattern: Regex,
    templates: Vec<String>,
}

impl CdnRule {
    /// Distinct product codes found in `text`, longest first, then by first appearance.
    ///
    /// Uses capture group 1 when the pattern has one, else the whole match.
    #[must_use]
    pub fn candidate_codes(&self, text: &str) -> Vec<String> {
        let mut codes: Vec<String> = Vec::new();
        for caps in self.pattern.captures_iter(text) {
            let Some(m) = caps.get(1).or_else(|| caps.get(0)) else {
                continue;
            };
            let code = m.as_str().to_string();
            if !codes.iter().any(|c| c.eq_ignore_ascii_case(&code)) {
                codes.push(code);
            }
        }
        // Stable sort keeps appearance order among equal lengths.
        codes.sort_by_key(|c| std::cmp::Reverse(c.len()));
        codes
    }

    /// Candidate image URLs: codes in preference order, templates in declared order.
    #[must_use]
    pub fn candidate_urls(&self, text: &str) -> Vec<String> {
        self.candidate_codes(text)
            .iter()
            .flat_map(|code| {
                self.templates.iter().map(move |template| {
                    template
                        .replace("{code}", &code.to_ascii_lowercase())
                        .replace("{CODE}", &code.to_ascii_uppercase())
                })
            })
            .collect()
    }
}

/// One vendor's entry.
#[derive(Debug, Clone)]
pub struct Vendor {
    domain: String,
    scrape: ScrapePolicy,
    cdn: Option<CdnRule>,
}

impl Vendor {
    /// Registrable domain this entry covers, subdomains included.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Scrape policy.
    #[must_use]
    pub fn scrape(&self) -> ScrapePolicy {
        self.scrape
    }

    /// CDN guessing rule, if the vendor has one.
    #[must_use]
    pub fn cdn(&self) -> Option<&CdnRule> {
        self.cdn.as_ref()
    }
}

/// Validated vendor catalog.
#[derive(Debug, Clone)]
pub struct VendorCatalog {
    image_extensions: Vec<String>,
    direct_host_markers: Vec<String>,
    vendors: Vec<Vendor>,
}

impl VendorCatalog {
    /// The catalog compiled into the binary.
    ///
    /// # Errors
    ///
    /// Only if the embedded JSON is malformed.
    pub fn embedded() -> Result<Self, CatalogError> {
        Self::from_json(DEFAULT_CATALOG_JSON)
    }

    /// Parses and validates catalog JSON.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Parse`], [`CatalogError::InvalidPattern`] or
    /// [`CatalogError::InvalidTemplate`].
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json).map_err(|e| CatalogError::Parse {
            reason: e.to_string(),
        })?;

        let mut vendors = Vec::with_capacity(file.vendors.len());
        for entry in file.vendors {
            let domain = canonical_host(&entry.domain);
            let cdn = entry
                .cdn
                .map(|rule| compile_rule(&domain, rule))
                .transpose()?;
            vendors.push(Vendor {
                domain,
                scrape: entry.scrape,
                cdn,
            });
        }

        debug!(vendor_count = vendors.len(), "vendor catalog loaded");

        Ok(Self {
            image_extensions: file
                .image_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            direct_host_markers: file
                .direct_host_markers
                .iter()
                .map(|m| m.to_ascii_lowercase())
                .collect(),
            vendors,
        })
    }

    /// Reads a catalog file.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Io`] when unreadable, otherwise as [`from_json`](Self::from_json).
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Number of vendor entries.
    #[must_use]
    pub fn vendor_count(&self) -> usize {
        self.vendors.len()
    }

    /// Finds the vendor covering `host` (exact domain or subdomain).
    #[must_use]
    pub fn vendor_for(&self, host: &str) -> Option<&Vendor> {
        self.vendors.iter().find(|v| host_in_domain(host, &v.domain))
    }

    /// Finds the vendor for a parsed URL.
    #[must_use]
    pub fn vendor_for_url(&self, url: &Url) -> Option<&Vendor> {
        url.host_str().and_then(|host| self.vendor_for(host))
    }

    /// True when the domain is classified `no-scrape`.
    #[must_use]
    pub fn is_no_scrape(&self, host: &str) -> bool {
        self.vendor_for(host)
            .is_some_and(|v| v.scrape == ScrapePolicy::NoScrape)
    }

    /// "Looks like an image URL": a known image extension on the path, or a
    /// direct-image host marker in the host.
    ///
    /// Non-URL values only get the extension check; host markers need a host.
    #[must_use]
    pub fn looks_like_image_url(&self, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }

        let (path, host) = match parse_http_url(value) {
            Some(url) => (
                url.path().to_ascii_lowercase(),
                url.host_str().map(str::to_ascii_lowercase),
            ),
            None => (value.to_ascii_lowercase(), None),
        };

        let has_extension = self
            .image_extensions
            .iter()
            .any(|ext| path.ends_with(&format!(".{ext}")));
        let has_marker = host.is_some_and(|host| {
            self.direct_host_markers
                .iter()
                .any(|marker| host.contains(marker.as_str()))
        });

        has_extension || has_marker
    }
}

fn compile_rule(domain: &str, rule: CdnRuleFile) -> Result<CdnRule, CatalogError> {
    let pattern = Regex::new(&rule.code_pattern).map_err(|e| CatalogError::InvalidPattern {
        domain: domain.to_string(),
        reason: e.to_string(),
    })?;
    if let Some(template) = rule
        .templates
        .iter()
        .find(|t| !t.contains("{code}") && !t.contains("{CODE}"))
    {
        return Err(CatalogError::InvalidTemplate {
            domain: domain.to_string(),
            template: template.clone(),
        });
    }
    Ok(CdnRule {
        pattern,
        templates: rule.templates,
    })
}
