//! Integration tests for rate-limited fetching against a mock HTTP server

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use manga_harvester::fetcher::pagination::PaginationHelper;
use manga_harvester::fetcher::shared_resources::{global_http_client, HostLimiterRegistry};
use manga_harvester::fetcher::{
    AdaptiveDelay, DelayConfig, FetchFailure, FetchTarget, RateLimitedFetcher, RetryErrorType,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_config(max_retries: u32) -> DelayConfig {
    DelayConfig::default()
        .with_bounds(Duration::from_millis(1), Some(Duration::from_millis(50)))
        .with_max_retries(max_retries)
}

fn fetcher_for(server: &MockServer, max_retries: u32) -> RateLimitedFetcher {
    let limiter = Arc::new(AdaptiveDelay::new(
        server.address().to_string(),
        fast_config(max_retries),
    ));
    RateLimitedFetcher::new(global_http_client(), limiter)
}

#[tokio::test]
async fn test_success_returns_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manga/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "m1"}})))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 3);
    let result = fetcher
        .fetch(&FetchTarget::get(format!("{}/manga/m1", server.uri())))
        .await
        .unwrap();

    assert!(result.succeeded);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.retries_used, 0);
    let body: Value = result.json().unwrap();
    assert_eq!(body["data"]["id"], "m1");
}

#[tokio::test]
async fn test_rate_limit_is_retried_with_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manga/m1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/manga/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 3);
    let result = fetcher
        .fetch(&FetchTarget::get(format!("{}/manga/m1", server.uri())))
        .await
        .unwrap();

    assert!(result.succeeded);
    assert_eq!(result.retries_used, 1);

    // Hint of 1s capped at 50ms, then one success shrink
    let delay = fetcher.limiter().snapshot().current_delay();
    assert!(delay > Duration::from_millis(40), "delay was {delay:?}");
    assert!(delay < Duration::from_millis(50), "delay was {delay:?}");
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 5);
    let result = fetcher
        .fetch(&FetchTarget::get(format!("{}/manga/missing", server.uri())))
        .await
        .unwrap();

    assert!(!result.succeeded);
    assert!(result.is_client_error());
    assert_eq!(result.status_code, Some(404));
    assert_eq!(result.retries_used, 0);
    assert_eq!(result.failure, Some(FetchFailure::ClientError { status: 404 }));
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 2);
    let result = fetcher
        .fetch(&FetchTarget::get(format!("{}/statistics", server.uri())))
        .await
        .unwrap();

    assert!(!result.succeeded);
    assert_eq!(result.retries_used, 2);
    assert_eq!(result.status_code, Some(503));
    assert_eq!(
        result.failure,
        Some(FetchFailure::ExhaustedRetries {
            last_error: RetryErrorType::ServerError(503)
        })
    );
    assert!(fetcher.limiter().snapshot().current_delay() > Duration::ZERO);
}

#[tokio::test]
async fn test_block_page_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>Our systems have detected unusual traffic</html>"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 3)
        .with_block_markers(vec!["Our systems have detected unusual traffic".to_string()]);
    let result = fetcher
        .fetch(&FetchTarget::get(format!("{}/results", server.uri())))
        .await
        .unwrap();

    assert!(result.succeeded);
    assert_eq!(result.retries_used, 1);
}

#[tokio::test]
async fn test_block_page_exhaustion_reports_block_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Just a moment..."))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 1).with_block_markers(vec!["Just a moment...".to_string()]);
    let result = fetcher
        .fetch(&FetchTarget::get(format!("{}/manga/berserk", server.uri())))
        .await
        .unwrap();

    assert_eq!(
        result.failure,
        Some(FetchFailure::ExhaustedRetries {
            last_error: RetryErrorType::BlockPage
        })
    );
}

#[tokio::test]
async fn test_post_json_body_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(wiremock::matchers::body_json(json!({"query": "{ Media(id: 1) { id } }"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"Media": {"id": 1}}})))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 0);
    let target = FetchTarget::post_json(
        format!("{}/", server.uri()),
        json!({"query": "{ Media(id: 1) { id } }"}),
    );
    let result = fetcher.fetch(&target).await.unwrap();
    assert!(result.succeeded);
}

#[tokio::test]
async fn test_limiter_is_shared_per_host() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let registry = HostLimiterRegistry::new();
    let host = server.address().to_string();
    let first = RateLimitedFetcher::new(
        global_http_client(),
        registry.limiter_for(&host, fast_config(0)),
    );
    let second = RateLimitedFetcher::new(
        global_http_client(),
        registry.limiter_for(&host, fast_config(0)),
    );

    first
        .fetch(&FetchTarget::get(format!("{}/a", server.uri())))
        .await
        .unwrap();

    assert!(Arc::ptr_eq(first.limiter(), second.limiter()));
    assert!(second.limiter().snapshot().current_delay() > Duration::ZERO);
}

#[tokio::test]
async fn test_offset_pagination_collects_all_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manga/m1/feed"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": 1}, {"id": 2}]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/manga/m1/feed"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": 3}]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/manga/m1/feed"))
        .and(query_param("offset", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, 1);
    let target = FetchTarget::get(format!("{}/manga/m1/feed", server.uri()));
    let result = PaginationHelper::collect_offset_pages(&fetcher, &target, 2, "/data")
        .await
        .unwrap();

    assert!(result.succeeded);
    let items: Vec<Value> = result.json().unwrap();
    assert_eq!(items, vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
}
