//! Request executor against a live mock server: retries, caching, errors

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pulsechain::cache::{CacheSettings, ResponseCache};
use pulsechain::client::{RequestExecutor, UrlSecurityPolicy};
use pulsechain::errors::PulsechainError;
use pulsechain::http::HttpRequest;
use pulsechain::retry::{is_retryable, RetryOptions};

fn quick_retry(max_retries: u32) -> RetryOptions<PulsechainError> {
    RetryOptions::new(max_retries, Duration::from_millis(10), false).retry_if(is_retryable)
}

#[tokio::test]
async fn test_server_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .expect(1)
        .mount(&server)
        .await;

    let executor = RequestExecutor::with_reqwest().unwrap().with_retry(quick_retry(3));
    let response = executor
        .execute_request(&HttpRequest::get(format!("{}/flaky", server.uri())), false, None)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "recovered");
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let executor = RequestExecutor::with_reqwest().unwrap().with_retry(quick_retry(2));
    let err = executor
        .execute_request(&HttpRequest::get(format!("{}/down", server.uri())), false, None)
        .await
        .unwrap_err();

    assert!(matches!(err, PulsechainError::Server { status: 502, .. }));
}

#[tokio::test]
async fn test_client_errors_are_returned_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "not found"})))
        .expect(1)
        .mount(&server)
        .await;

    let executor = RequestExecutor::with_reqwest().unwrap().with_retry(quick_retry(3));
    let response = executor
        .execute_request(&HttpRequest::get(format!("{}/missing", server.uri())), false, None)
        .await
        .unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.is_success());
    assert_eq!(response.json().unwrap()["error"], "not found");
}

#[tokio::test]
async fn test_get_responses_are_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cached"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(ResponseCache::memory_only(CacheSettings::default()));
    let executor = RequestExecutor::with_reqwest().unwrap().with_cache(cache.clone());
    let request = HttpRequest::get(format!("{}/cached", server.uri()));

    let first = executor.execute_request(&request, true, None).await.unwrap();
    let second = executor.execute_request(&request, true, None).await.unwrap();

    assert_eq!(first, second);
    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.memory_entries, 1);
}

#[tokio::test]
async fn test_cache_bypassed_for_other_methods() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    let cache = Arc::new(ResponseCache::memory_only(CacheSettings::default()));
    let executor = RequestExecutor::with_reqwest().unwrap().with_cache(cache.clone());
    let request = HttpRequest::new("POST", format!("{}/orders", server.uri()))
        .unwrap()
        .with_body("{}");

    executor.execute_request(&request, true, None).await.unwrap();
    executor.execute_request(&request, true, None).await.unwrap();

    assert_eq!(cache.stats().await.total_entries, 0);
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let executor = RequestExecutor::with_reqwest()
        .unwrap()
        .with_retry(quick_retry(0))
        .with_timeout(Duration::from_millis(50));
    let err = executor
        .execute_request(&HttpRequest::get(format!("{}/slow", server.uri())), false, None)
        .await
        .unwrap_err();

    assert!(matches!(err, PulsechainError::Timeout(_)));
}

#[tokio::test]
async fn test_security_policy_and_url_validation() {
    let executor = RequestExecutor::with_reqwest()
        .unwrap()
        .with_security(Arc::new(UrlSecurityPolicy::new(true)));

    let err = executor
        .execute_request(&HttpRequest::get("http://api.example.com/x"), false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PulsechainError::SecurityValidationFailed { .. }));

    let err = executor
        .execute_request(&HttpRequest::get("not a url"), false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PulsechainError::InvalidUrl { .. }));
}

#[tokio::test]
async fn test_refused_connection_is_reported_with_hint() {
    // Bind then drop to get a port nothing listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

    let executor = RequestExecutor::with_reqwest().unwrap().with_retry(quick_retry(0));
    let err = executor
        .execute_request(&HttpRequest::get(format!("http://127.0.0.1:{}/", port)), false, None)
        .await
        .unwrap_err();

    match err {
        PulsechainError::ConnectionRefused { hint, .. } => assert!(hint.is_some()),
        other => panic!("expected ConnectionRefused, got {:?}", other),
    }
}
