//! Integration tests for the resolution pipeline.
//!
//! Runs the standard strategy chain against wiremock pages and search endpoints.

use std::sync::Arc;

use sheet_images_core::resolver::{AttemptOutcome, SkipPolicy};
use sheet_images_core::{
    Fetcher, HttpTransport, RateLimiter, ResolutionPipeline, RetryPolicy, SearchFallback,
    StrategyKind, VendorCatalog,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

fn test_fetcher() -> Fetcher {
    Fetcher::new(Arc::new(HttpTransport::new().unwrap()))
        .with_retry_policy(RetryPolicy::no_retry())
        .with_rate_limiter(Arc::new(RateLimiter::disabled()))
}

fn pipeline(
    server: &MockServer,
    catalog: VendorCatalog,
    fallback: SearchFallback,
) -> ResolutionPipeline {
    ResolutionPipeline::standard(test_fetcher(), Arc::new(catalog), server.uri())
        .with_search_fallback(fallback)
}

fn embedded_pipeline(server: &MockServer, fallback: SearchFallback) -> ResolutionPipeline {
    pipeline(server, VendorCatalog::embedded().unwrap(), fallback)
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
}

/// Catalog marking the mock server's host as bot-protected.
fn no_scrape_catalog() -> VendorCatalog {
    let json = serde_json::json!({
        "vendors": [{ "domain": "127.0.0.1", "scrape": "no-scrape" }]
    });
    VendorCatalog::from_json(&json.to_string()).unwrap()
}

async fn mount_search(server: &MockServer, image: &str) {
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("iax", "images"))
        .respond_with(html(r#"<script>vqd="4-1234567890";</script>"#))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/i.js"))
        .and(query_param("vqd", "4-1234567890"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_json(serde_json::json!({ "results": [{ "image": image }] })),
        )
        .expect(1)
        .mount(server)
        .await;
}

// ==================== Page Scraping ====================

#[tokio::test]
async fn test_meta_tag_returns_og_image_exactly() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/product/42"))
        .respond_with(html(
            r#"<html><head>
                <meta property="og:image" content="https://example.com/a.jpg">
                <meta name="twitter:image" content="https://example.com/twitter.jpg">
            </head><body></body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = embedded_pipeline(&server, SearchFallback::Never);
    let resolved = pipeline
        .resolve(0, &format!("{}/product/42", server.uri()))
        .await
        .unwrap();

    assert_eq!(resolved.image_url, "https://example.com/a.jpg");
    assert_eq!(resolved.strategy_used, StrategyKind::MetaTag);
    assert_eq!(resolved.source_row_index, 0);
}

#[tokio::test]
async fn test_structured_data_takes_first_list_entry() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/product/7"))
        .respond_with(html(
            r#"<html><head>
                <script type="application/ld+json">
                {"@type": "Product", "image": ["https://example.com/b.jpg", "https://example.com/c.jpg"]}
                </script>
            </head><body></body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = embedded_pipeline(&server, SearchFallback::Never);
    let trace = pipeline
        .resolve_traced(3, &format!("{}/product/7", server.uri()))
        .await;

    let resolved = trace.resolved.clone().unwrap();
    assert_eq!(resolved.image_url, "https://example.com/b.jpg");
    assert_eq!(resolved.strategy_used, StrategyKind::StructuredData);
    assert_eq!(
        trace.attempted(),
        vec![
            StrategyKind::DirectLink,
            StrategyKind::VendorCdnGuess,
            StrategyKind::MetaTag,
            StrategyKind::StructuredData,
        ]
    );
}

#[tokio::test]
async fn test_page_fetched_once_for_both_scrapers() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    // Neither scraper finds anything, so both read the same cached page.
    Mock::given(method("GET"))
        .and(path("/bare"))
        .respond_with(html("<html><head><title>Nothing</title></head></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = embedded_pipeline(&server, SearchFallback::Never);
    let trace = pipeline
        .resolve_traced(0, &format!("{}/bare", server.uri()))
        .await;

    assert!(trace.resolved.is_none());
    assert!(trace.attempted().contains(&StrategyKind::StructuredData));
}

#[tokio::test]
async fn test_failed_page_fetch_recorded_as_failure() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = embedded_pipeline(&server, SearchFallback::Never);
    let trace = pipeline
        .resolve_traced(0, &format!("{}/gone", server.uri()))
        .await;

    assert!(trace.resolved.is_none());
    for kind in [StrategyKind::MetaTag, StrategyKind::StructuredData] {
        let attempt = trace.attempts.iter().find(|a| a.strategy == kind).unwrap();
        assert!(
            matches!(&attempt.outcome, AttemptOutcome::Failed(msg) if msg.contains("404")),
            "{kind}: {:?}",
            attempt.outcome
        );
    }
    assert_eq!(trace.page_error.as_ref().and_then(|e| e.status()), Some(404));
}

#[tokio::test]
async fn test_blocked_page_keeps_status_in_trace() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/guarded"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = embedded_pipeline(&server, SearchFallback::Never);
    let trace = pipeline
        .resolve_traced(0, &format!("{}/guarded", server.uri()))
        .await;

    assert!(trace.resolved.is_none());
    assert_eq!(trace.page_error.as_ref().and_then(|e| e.status()), Some(403));
    let json = serde_json::to_value(&trace).unwrap();
    let meta = json["attempts"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["strategy"] == "meta-tag")
        .unwrap();
    assert_eq!(meta["outcome"], "failed");
    assert!(meta["detail"].as_str().unwrap().contains("HTTP 403"));
}

// ==================== Vendor Rules ====================

#[tokio::test]
async fn test_no_scrape_domain_never_fetches_page() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/listing/123/blue-mug"))
        .respond_with(html(
            r#"<meta property="og:image" content="https://example.com/should-not-see.jpg">"#,
        ))
        .expect(0)
        .mount(&server)
        .await;

    let pipeline = pipeline(&server, no_scrape_catalog(), SearchFallback::Never);
    let trace = pipeline
        .resolve_traced(0, &format!("{}/listing/123/blue-mug", server.uri()))
        .await;

    assert!(trace.resolved.is_none());
    assert_eq!(
        trace.attempted(),
        vec![StrategyKind::DirectLink, StrategyKind::VendorCdnGuess]
    );
    let skipped: Vec<_> = trace
        .attempts
        .iter()
        .filter(|a| a.outcome == AttemptOutcome::Skipped(SkipPolicy::NoScrapeDomain))
        .map(|a| a.strategy)
        .collect();
    assert_eq!(
        skipped,
        vec![StrategyKind::MetaTag, StrategyKind::StructuredData]
    );
}

#[tokio::test]
async fn test_vendor_cdn_probe_finds_image() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let json = serde_json::json!({
        "vendors": [{
            "domain": "127.0.0.1",
            "scrape": "no-scrape",
            "cdn": {
                "code_pattern": "(?i)\\b([a-z]\\d{5})\\b",
                "templates": [
                    format!("{}/missing/{{code}}.jpg", server.uri()),
                    format!("{}/cdn/{{CODE}}.jpg", server.uri())
                ]
            }
        }]
    });
    let catalog = VendorCatalog::from_json(&json.to_string()).unwrap();

    Mock::given(method("HEAD"))
        .and(path("/missing/a12345.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/cdn/A12345.jpg"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/jpeg"))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline(&server, catalog, SearchFallback::Never);
    let resolved = pipeline
        .resolve(0, &format!("{}/style/a12345", server.uri()))
        .await
        .unwrap();

    assert_eq!(resolved.strategy_used, StrategyKind::VendorCdnGuess);
    assert_eq!(resolved.image_url, format!("{}/cdn/A12345.jpg", server.uri()));
}

// ==================== Direct Links ====================

#[tokio::test]
async fn test_direct_image_url_makes_no_requests() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let value = format!("{}/images/photo.JPG", server.uri());

    let pipeline = embedded_pipeline(&server, SearchFallback::Always);
    let resolved = pipeline.resolve(0, &value).await.unwrap();

    assert_eq!(resolved.image_url, value);
    assert_eq!(resolved.strategy_used, StrategyKind::DirectLink);
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty(), "got {} requests", requests.len());
}

#[tokio::test]
async fn test_resolution_is_idempotent() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/product/9"))
        .respond_with(html(
            r#"<meta property="og:image" content="/static/nine.png">"#,
        ))
        .expect(2)
        .mount(&server)
        .await;

    let pipeline = embedded_pipeline(&server, SearchFallback::Never);
    let value = format!("{}/product/9", server.uri());
    let first = pipeline.resolve(1, &value).await.unwrap();
    let second = pipeline.resolve(1, &value).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.image_url, format!("{}/static/nine.png", server.uri()));
}

// ==================== Search Fallback ====================

#[tokio::test]
async fn test_search_runs_when_scraping_is_blocked() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_search(&server, "https://example.com/found.jpg").await;

    let pipeline = pipeline(
        &server,
        no_scrape_catalog(),
        SearchFallback::WhenScrapingSkipped,
    );
    let resolved = pipeline
        .resolve(0, &format!("{}/listing/123/blue-ceramic-mug", server.uri()))
        .await
        .unwrap();

    assert_eq!(resolved.strategy_used, StrategyKind::SearchEngine);
    assert_eq!(resolved.image_url, "https://example.com/found.jpg");
}

#[tokio::test]
async fn test_search_handles_free_text_values() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_search(&server, "https://example.com/lamp.jpg").await;

    let pipeline = embedded_pipeline(&server, SearchFallback::Always);
    let trace = pipeline.resolve_traced(0, "brass desk lamp").await;

    assert_eq!(
        trace.resolved.unwrap().image_url,
        "https://example.com/lamp.jpg"
    );
    let not_url: Vec<_> = trace
        .attempts
        .iter()
        .filter(|a| a.outcome == AttemptOutcome::Skipped(SkipPolicy::NotAUrl))
        .map(|a| a.strategy)
        .collect();
    assert!(not_url.contains(&StrategyKind::MetaTag));
}

#[tokio::test]
async fn test_search_skipped_after_page_was_scraped() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(html("<html></html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/i.js"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let pipeline = embedded_pipeline(&server, SearchFallback::WhenScrapingSkipped);
    let trace = pipeline
        .resolve_traced(0, &format!("{}/plain", server.uri()))
        .await;

    assert!(trace.resolved.is_none());
    let search = trace.attempts.last().unwrap();
    assert_eq!(search.strategy, StrategyKind::SearchEngine);
    assert_eq!(
        search.outcome,
        AttemptOutcome::Skipped(SkipPolicy::PageWasScraped)
    );
}

#[tokio::test]
async fn test_search_without_token_is_recorded_as_failure() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<html>no token here</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = embedded_pipeline(&server, SearchFallback::Always);
    let trace = pipeline.resolve_traced(0, "mystery item").await;

    assert!(trace.resolved.is_none());
    assert!(matches!(
        trace.attempts.last().map(|a| &a.outcome),
        Some(AttemptOutcome::Failed(_))
    ));
}
