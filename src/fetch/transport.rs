//! The wire layer under the [`Fetcher`](super::Fetcher).
//!
//! [`FetchTransport`] sends one request and reports whatever came back; it
//! never retries and never judges status codes. [`HttpTransport`] is the
//! default reqwest implementation and owns the browser identity, the session
//! cookie jar and the body-size cap.

use std::panic::{AssertUnwindSafe, catch_unwind, set_hook, take_hook};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::{debug, warn};

use super::constants::{CONNECT_TIMEOUT_SECS, MAX_BODY_BYTES};
use super::error::FetchError;
use crate::user_agent::{BrowserIdentity, IMAGE_ACCEPT, JSON_ACCEPT, PAGE_ACCEPT};

/// What a request is for. Selects the `Accept` header and the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    /// An HTML document.
    Page,
    /// Image bytes (also used for HEAD probes).
    Image,
    /// A JSON API response.
    Json,
}

impl FetchKind {
    /// `Accept` header value for this kind.
    #[must_use]
    pub fn accept(self) -> &'static str {
        match self {
            Self::Page => PAGE_ACCEPT,
            Self::Image => IMAGE_ACCEPT,
            Self::Json => JSON_ACCEPT,
        }
    }
}

/// HTTP method used by the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    /// GET with body.
    Get,
    /// HEAD, body ignored.
    Head,
}

/// A single outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Request method.
    pub method: FetchMethod,
    /// Absolute URL.
    pub url: String,
    /// Content kind.
    pub kind: FetchKind,
    /// Hard ceiling for the whole exchange, body included.
    pub timeout: Duration,
}

/// Whatever the server answered, success or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    /// Declared `Content-Type`, if any.
    pub content_type: Option<String>,
    /// Raw `Retry-After` header, if any.
    pub retry_after: Option<String>,
    /// Response body (empty for HEAD).
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request. Implementations must be shareable across row tasks.
#[async_trait]
pub trait FetchTransport: Send + Sync {
    /// Performs the exchange.
    ///
    /// # Errors
    ///
    /// Transport-level failures only: timeouts, connection errors, invalid
    /// URLs and oversized bodies. HTTP error statuses are returned as
    /// ordinary responses.
    async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Default reqwest transport presenting a desktop browser identity.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    identity: BrowserIdentity,
    max_body_bytes: u64,
}

impl HttpTransport {
    /// Builds a transport with the default desktop identity.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ClientBuild`] if reqwest cannot construct a client.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_identity(BrowserIdentity::default())
    }

    /// Builds a transport presenting `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ClientBuild`] if reqwest cannot construct a client.
    pub fn with_identity(identity: BrowserIdentity) -> Result<Self, FetchError> {
        let client = build_client(&identity, CONNECT_TIMEOUT_SECS)?;
        Ok(Self {
            client,
            identity,
            max_body_bytes: MAX_BODY_BYTES,
        })
    }

    /// Overrides the body-size cap.
    #[must_use]
    pub fn with_max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Returns the identity sent with every request.
    #[must_use]
    pub fn identity(&self) -> &BrowserIdentity {
        &self.identity
    }
}

#[async_trait]
impl FetchTransport for HttpTransport {
    async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = request.url.as_str();
        let parsed = url::Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::invalid_url(url));
        }

        let builder = match request.method {
            FetchMethod::Get => self.client.get(parsed),
            FetchMethod::Head => self.client.head(parsed),
        };

        let response = builder
            .header(ACCEPT, request.kind.accept())
            .header(ACCEPT_LANGUAGE, self.identity.accept_language.as_str())
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, &e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = header_string(&response, CONTENT_TYPE);
        let retry_after = header_string(&response, RETRY_AFTER);

        let body = if request.method == FetchMethod::Head || !(200..300).contains(&status) {
            Vec::new()
        } else {
            read_capped_body(response, url, self.max_body_bytes).await?
        };

        debug!(url, status, bytes = body.len(), "response received");

        Ok(FetchResponse {
            status,
            final_url,
            content_type,
            retry_after,
            body,
        })
    }
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(std::string::ToString::to_string)
}

fn map_reqwest_error(url: &str, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::timeout(url)
    } else if error.is_builder() {
        FetchError::invalid_url(url)
    } else {
        FetchError::network(url, error)
    }
}

async fn read_capped_body(
    response: reqwest::Response,
    url: &str,
    limit: u64,
) -> Result<Vec<u8>, FetchError> {
    if response.content_length().is_some_and(|len| len > limit) {
        return Err(FetchError::too_large(url, limit));
    }

    let mut stream = response.bytes_stream();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| map_reqwest_error(url, &e))?;
        if (body.len() + chunk.len()) as u64 > limit {
            return Err(FetchError::too_large(url, limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn build_client(identity: &BrowserIdentity, connect_timeout_secs: u64) -> Result<Client, FetchError> {
    match try_build_client(identity, connect_timeout_secs, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            warn!(
                "HTTP client builder panicked while loading system proxy settings; retrying with env-proxy fallback"
            );
            match try_build_client(identity, connect_timeout_secs, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Build(error)) => Err(FetchError::client_build(error)),
                Err(BuildClientFailure::Panic) => Err(FetchError::client_build(
                    "client builder panicked while applying env-proxy fallback",
                )),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(FetchError::client_build(error)),
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

// catch_unwind does not silence the panic hook; hold the hook swap under a lock.
static CLIENT_BUILD_PANIC_HOOK_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn try_build_client(
    identity: &BrowserIdentity,
    connect_timeout_secs: u64,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind_silent(AssertUnwindSafe(move || {
        #[cfg(test)]
        maybe_inject_client_build_panic(disable_system_proxy_lookup);

        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .cookie_store(true)
            .gzip(true)
            .user_agent(identity.user_agent.as_str());
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn catch_unwind_silent<F, T>(operation: F) -> Result<T, Box<dyn std::any::Any + Send + 'static>>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    let _guard = CLIENT_BUILD_PANIC_HOOK_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let previous_hook = take_hook();
    set_hook(Box::new(|_| {}));
    let outcome = catch_unwind(operation);
    set_hook(previous_hook);
    outcome
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    let names: &[&str] = match scheme {
        "https" => &["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"],
        "http" => &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"],
        _ => return None,
    };
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[cfg(test)]
static CLIENT_BUILD_PANIC_INJECTION_COUNT: std::sync::atomic::AtomicUsize =
    std::sync::atomic::AtomicUsize::new(0);

#[cfg(test)]
fn maybe_inject_client_build_panic(disable_system_proxy_lookup: bool) {
    use std::sync::atomic::Ordering;

    if disable_system_proxy_lookup {
        return;
    }
    if CLIENT_BUILD_PANIC_INJECTION_COUNT
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
            if count > 0 { Some(count - 1) } else { None }
        })
        .is_ok()
    {
        panic!("injected HTTP client builder panic");
    }
}
