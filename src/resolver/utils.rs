//! Shared helpers for strategies: host normalization, URL parsing and static regexes.

use regex::Regex;
use url::Url;

/// Compiles a regex at static init; panics on invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Normalizes a host string: trim, strip leading "www.", trailing '.', and lowercases.
#[must_use]
pub fn canonical_host(host: &str) -> String {
    host.trim()
        .to_ascii_lowercase()
        .trim_start_matches("www.")
        .trim_end_matches('.')
        .to_string()
}

/// Returns true when `host` is `domain` or one of its subdomains.
///
/// ```
/// use sheet_images_core::resolver::host_in_domain;
///
/// assert!(host_in_domain("www.etsy.com", "etsy.com"));
/// assert!(host_in_domain("i.etsystatic.com", "etsystatic.com"));
/// assert!(!host_in_domain("notetsy.com", "etsy.com"));
/// ```
#[must_use]
pub fn host_in_domain(host: &str, domain: &str) -> bool {
    let host = canonical_host(host);
    let domain = canonical_host(domain);
    if domain.is_empty() {
        return false;
    }
    host == domain
        || host
            .strip_suffix(domain.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Parses `value` as an absolute http(s) URL with a host.
#[must_use]
pub fn parse_http_url(value: &str) -> Option<Url> {
    let url = Url::parse(value.trim()).ok()?;
    if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() {
        Some(url)
    } else {
        None
    }
}

/// Resolves a possibly relative URL string against a base URL.
///
/// Absolute http(s) values pass through; `//host/...` takes the base scheme;
/// anything else is joined onto `base_url`. Empty values yield `None`.
#[must_use]
pub fn absolutize_url(value: &str, base_url: &Url) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("{}:{value}", base_url.scheme()));
    }
    let joined = base_url.join(value).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}
