//! Tests for the HTTP transport module

use super::*;
use crate::auth::AuthConfig;
use crate::error::Error;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::{Duration, Instant};
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(max_retries)
        .with_delays(Duration::from_millis(5), Duration::from_millis(20))
        .with_jitter(Duration::ZERO)
}

fn client_for(server: &MockServer, max_retries: u32) -> HttpClient {
    let config = HttpClientConfig::builder()
        .base_url(server.uri())
        .retry(fast_retry(max_retries))
        .build();
    HttpClient::with_config(config).unwrap()
}

#[test]
fn test_http_client_config_default() {
    let config = HttpClientConfig::default();
    assert_eq!(config.timeout, Duration::from_secs(30));
    assert_eq!(config.retry.max_retries, 5);
    assert!(config.base_url.is_none());
    assert!(config.rate_limit.is_none());
    assert!(config.user_agent.starts_with("wms-extract/"));
}

#[test]
fn test_http_client_config_builder() {
    let config = HttpClientConfig::builder()
        .base_url("https://wms.example.com/api")
        .timeout(Duration::from_secs(60))
        .retry(fast_retry(2))
        .rate_limit(RateLimiterConfig::new(5, 5))
        .header("X-Tenant", "acme")
        .user_agent("test-agent/1.0")
        .build();

    assert_eq!(config.base_url.as_deref(), Some("https://wms.example.com/api"));
    assert_eq!(config.timeout, Duration::from_secs(60));
    assert_eq!(config.retry.max_retries, 2);
    assert_eq!(config.rate_limit, Some(RateLimiterConfig::new(5, 5)));
    assert_eq!(config.default_headers.get("X-Tenant"), Some(&"acme".to_string()));
    assert_eq!(config.user_agent, "test-agent/1.0");
}

#[test]
fn test_request_from_relative_link() {
    let base = Url::parse("https://wms.example.com/api/v1/").unwrap();
    let request = ApiRequest::from_link("items?page=3&page_size=50", &base).unwrap();

    assert_eq!(request.target, "https://wms.example.com/api/v1/items");
    assert_eq!(request.query_value("page"), Some("3"));
    assert_eq!(request.query_value("page_size"), Some("50"));

    let rooted = ApiRequest::from_link("/other/items?cursor=abc%3D", &base).unwrap();
    assert_eq!(rooted.target, "https://wms.example.com/other/items");
    assert_eq!(rooted.query_value("cursor"), Some("abc="));
}

#[test]
fn test_request_from_absolute_link() {
    let base = Url::parse("https://wms.example.com/api/").unwrap();
    let request =
        ApiRequest::from_link("https://cdn.example.com/items/?cursor=xyz#frag", &base).unwrap();

    assert_eq!(request.target, "https://cdn.example.com/items/");
    assert_eq!(request.query.len(), 1);
    assert_eq!(request.query_value("cursor"), Some("xyz"));
}

#[test]
fn test_response_headers() {
    let response = ApiResponse::new(200, json!([])).with_header("Link", "<x>; rel=\"next\"");
    assert_eq!(response.header("link"), Some("<x>; rel=\"next\""));
    assert_eq!(response.header("retry-after"), None);
}

#[tokio::test]
async fn test_execute_sends_query_and_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("limit", "2"))
        .and(header("X-Tenant", "acme"))
        .and(header("X-Trace", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": 1}, {"id": 2}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = HttpClientConfig::builder()
        .base_url(mock_server.uri())
        .header("X-Tenant", "acme")
        .build();
    let client = HttpClient::with_config(config).unwrap();

    let request = ApiRequest::new("/items").query("limit", "2").header("X-Trace", "t1");
    let response = client.execute(&request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body["results"][1]["id"], 2);
    assert_eq!(client.breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_empty_body_is_null() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 0);
    let response = client.execute(&ApiRequest::new("ping")).await.unwrap();
    assert_eq!(response.body, serde_json::Value::Null);
}

#[tokio::test]
async fn test_invalid_json_is_decode_error_and_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 3);
    let err = client.execute(&ApiRequest::new("/items")).await.unwrap_err();
    assert!(matches!(err, Error::Decode { .. }));
    assert_eq!(client.breaker().consecutive_failures(), 0);
}

#[tokio::test]
async fn test_retry_on_server_error_then_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 3);
    let response = client.execute(&ApiRequest::new("/items")).await.unwrap();
    assert_eq!(response.body, json!([{"id": 1}]));

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
}

#[tokio::test]
async fn test_retries_exhausted_returns_last_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 2);
    let err = client.execute(&ApiRequest::new("/items")).await.unwrap_err();

    assert!(matches!(err, Error::HttpStatus { status: 502, .. }));
    // One logical call counts once against the breaker
    assert_eq!(client.breaker().consecutive_failures(), 1);
}

#[tokio::test]
async fn test_client_error_not_retried_and_not_counted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such entity"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 3);
    let err = client.execute(&ApiRequest::new("/missing")).await.unwrap_err();

    match err {
        Error::HttpStatus { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such entity");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.breaker().consecutive_failures(), 0);
}

#[tokio::test]
async fn test_rate_limited_honours_retry_after() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 3);
    let started = Instant::now();
    client.execute(&ApiRequest::new("/items")).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_rate_limited_without_retries_surfaces() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 0);
    let err = client.execute(&ApiRequest::new("/items")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::RateLimited {
            retry_after_seconds: 7
        }
    ));
}

#[tokio::test]
async fn test_unauthorized_refreshes_token_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "expires_in": 3600
        })))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let config = HttpClientConfig::builder()
        .base_url(mock_server.uri())
        .retry(fast_retry(0))
        .build();
    let auth = AuthConfig::Oauth2ClientCredentials {
        token_url: format!("{}/oauth/token", mock_server.uri()),
        client_id: "c".to_string(),
        client_secret: "s".to_string(),
        scopes: vec![],
    };
    let client = HttpClient::with_auth(config, auth).unwrap();

    let response = client.execute(&ApiRequest::new("/items")).await.unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_unauthorized_with_static_token_is_fatal() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = HttpClientConfig::builder()
        .base_url(mock_server.uri())
        .retry(fast_retry(3))
        .build();
    let client = HttpClient::with_auth(
        config,
        AuthConfig::Bearer {
            token: "stale".to_string(),
        },
    )
    .unwrap();

    let err = client.execute(&ApiRequest::new("/items")).await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 401, .. }));
    assert_eq!(err.kind(), "fatal_transport");
}

#[tokio::test]
async fn test_circuit_opens_and_fails_fast_without_network() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = HttpClientConfig::builder()
        .base_url(mock_server.uri())
        .retry(fast_retry(0))
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
        })
        .build();
    let client = HttpClient::with_config(config).unwrap();
    let request = ApiRequest::new("/items");

    for _ in 0..2 {
        let err = client.execute(&request).await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 500, .. }));
    }
    assert_eq!(client.breaker().state(), CircuitState::Open);

    let err = client.execute(&request).await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
    assert_eq!(err.kind(), "circuit_open");
}

#[tokio::test]
async fn test_half_open_trial_closes_circuit() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let config = HttpClientConfig::builder()
        .base_url(mock_server.uri())
        .retry(fast_retry(0))
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
            success_threshold: 1,
        })
        .build();
    let client = HttpClient::with_config(config).unwrap();
    let request = ApiRequest::new("/items");

    assert!(client.execute(&request).await.is_err());
    assert_eq!(client.breaker().state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(client.breaker().state(), CircuitState::HalfOpen);

    client.execute(&request).await.unwrap();
    assert_eq!(client.breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_shared_breaker_between_clients() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let breaker = std::sync::Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 1,
        recovery_timeout: Duration::from_secs(60),
        success_threshold: 1,
    }));
    let first = client_for(&mock_server, 0).with_breaker(breaker.clone());
    let second = client_for(&mock_server, 0).with_breaker(breaker.clone());

    assert!(first.execute(&ApiRequest::new("/a")).await.is_err());
    let err = second.execute(&ApiRequest::new("/b")).await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
}

#[tokio::test]
async fn test_dropped_execute_aborts_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server, 0);
    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_millis(100),
        client.execute(&ApiRequest::new("/slow")),
    )
    .await;

    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.breaker().consecutive_failures(), 0);
}
