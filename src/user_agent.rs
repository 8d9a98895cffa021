//! Browser identities presented by the default fetch transport.
//!
//! Single source for User-Agent and `Accept` header sets so page, image and
//! probe traffic stay consistent. Sites with real bot detection (TLS
//! fingerprinting, CAPTCHA) are not defeated by this; it only avoids the
//! trivial "no browser UA" block.

/// Desktop Chrome identity used for every request by default.
pub const DESKTOP_CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// `Accept` header for HTML page fetches.
pub const PAGE_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// `Accept` header for image fetches and existence probes.
pub const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

/// `Accept` header for JSON search API calls.
pub const JSON_ACCEPT: &str = "application/json,text/javascript,*/*;q=0.01";

/// `Accept-Language` sent with every request.
pub const ACCEPT_LANGUAGE: &str = "en-GB,en;q=0.9";

/// A browser identity: User-Agent plus the header sets sent alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserIdentity {
    /// User-Agent header value.
    pub user_agent: String,
    /// Accept-Language header value.
    pub accept_language: String,
}

impl BrowserIdentity {
    /// Creates an identity with a custom User-Agent.
    #[must_use]
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            accept_language: ACCEPT_LANGUAGE.to_string(),
        }
    }

    /// Desktop Chrome on Windows.
    #[must_use]
    pub fn desktop_chrome() -> Self {
        Self::new(DESKTOP_CHROME_USER_AGENT)
    }
}

impl Default for BrowserIdentity {
    fn default() -> Self {
        Self::desktop_chrome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identity_is_desktop_browser() {
        let identity = BrowserIdentity::default();
        assert!(identity.user_agent.starts_with("Mozilla/5.0"));
        assert!(identity.user_agent.contains("Chrome/"));
        assert_eq!(identity.accept_language, ACCEPT_LANGUAGE);
    }

    #[test]
    fn test_accept_sets_differ_by_content_kind() {
        assert!(PAGE_ACCEPT.starts_with("text/html"));
        assert!(IMAGE_ACCEPT.starts_with("image/"));
        assert!(!IMAGE_ACCEPT.contains("text/html"));
    }

    #[test]
    fn test_custom_identity_keeps_language() {
        let identity = BrowserIdentity::new("TestAgent/1.0");
        assert_eq!(identity.user_agent, "TestAgent/1.0");
        assert_eq!(identity.accept_language, ACCEPT_LANGUAGE);
    }
}
