//! HTTP transport with retry, rate limiting and circuit protection
//!
//! One [`HttpClient::execute`] is one logical call:
//! - the shared circuit breaker is consulted first (fail fast when open)
//! - transient failures are retried with exponential backoff and jitter
//! - 429 responses honour `Retry-After` when the server sends one
//! - a 401 with refreshable credentials invalidates the token and retries once

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::rate_limit::{RateLimiter, RateLimiterConfig};
use super::retry::{parse_retry_after, RetryPolicy};
use crate::auth::{AuthConfig, Authenticator};
use crate::error::{Error, Result};
use crate::types::StringMap;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

// ============================================================================
// Request / Response
// ============================================================================

/// One GET request against the upstream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiRequest {
    /// Path relative to the base URL, or an absolute URL
    pub target: String,
    /// Query parameters, kept ordered so requests are reproducible
    pub query: BTreeMap<String, String>,
    /// Extra headers for this request only
    pub headers: BTreeMap<String, String>,
}

impl ApiRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Build a request from a link, resolving relative links against `base`
    ///
    /// The link's query string is moved into [`ApiRequest::query`] so later
    /// parameters (page size, filters) can override it.
    pub fn from_link(link: &str, base: &Url) -> Result<Self> {
        let mut url = base.join(link.trim())?;
        let query = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self {
            target: url.to_string(),
            query,
            headers: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_query(key, value);
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn set_query(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.query.insert(key.into(), value.into());
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

/// A successful upstream response with its body decoded as JSON
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// `Value::Null` for an empty body
    pub body: Value,
    /// Time from sending the request to having the full body
    pub elapsed: Duration,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
            elapsed: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Executes logical requests against the upstream
///
/// Everything above the transport (discovery, pagination, extraction) talks
/// to the upstream only through this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

// ============================================================================
// Client configuration
// ============================================================================

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL for relative request targets
    pub base_url: Option<String>,
    /// Per-attempt request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Client-side pacing; `None` disables it
    pub rate_limit: Option<RateLimiterConfig>,
    /// Headers sent with every request
    pub default_headers: StringMap,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: None,
            default_headers: StringMap::new(),
            user_agent: format!("wms-extract/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

/// Builder for HTTP client config
#[derive(Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    #[must_use]
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    #[must_use]
    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.config.rate_limit = Some(config);
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

// ============================================================================
// Client
// ============================================================================

/// Resilient HTTP transport for one upstream connection
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    authenticator: Option<Authenticator>,
    rate_limiter: Option<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
}

impl HttpClient {
    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        let rate_limiter = config.rate_limit.as_ref().map(RateLimiter::new);
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));

        Ok(Self {
            client,
            config,
            authenticator: None,
            rate_limiter,
            breaker,
        })
    }

    /// Create a client that authenticates every request
    pub fn with_auth(config: HttpClientConfig, auth_config: AuthConfig) -> Result<Self> {
        let mut client = Self::with_config(config)?;
        if !matches!(auth_config, AuthConfig::None) {
            client.authenticator = Some(Authenticator::with_client(
                auth_config,
                client.client.clone(),
            ));
        }
        Ok(client)
    }

    /// Share an existing breaker (one per upstream connection)
    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Build full URL from a path or absolute URL
    fn build_url(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            return target.to_string();
        }

        match &self.config.base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                let path = target.trim_start_matches('/');
                format!("{base}/{path}")
            }
            None => target.to_string(),
        }
    }

    fn timeout_error(&self) -> Error {
        Error::Timeout {
            timeout_ms: self.config.timeout.as_millis() as u64,
        }
    }

    async fn send_once(&self, url: &str, request: &ApiRequest) -> Result<Response> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.wait().await;
        }

        let mut req = self.client.get(url);
        for (key, value) in &self.config.default_headers {
            req = req.header(key.as_str(), value.as_str());
        }
        for (key, value) in &request.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        if let Some(auth) = &self.authenticator {
            req = auth.apply(req).await?;
        }

        req.send().await.map_err(|e| {
            if e.is_timeout() {
                self.timeout_error()
            } else {
                Error::Http(e)
            }
        })
    }

    async fn read_body(&self, url: &str, response: Response, started: Instant) -> Result<ApiResponse> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text().await?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| Error::decode(format!("invalid JSON from {url}: {e}")))?
        };

        let elapsed = started.elapsed();
        debug!(url, status, elapsed_ms = elapsed.as_millis() as u64, "request completed");

        Ok(ApiResponse {
            status,
            headers,
            body,
            elapsed,
        })
    }

    /// The retry loop, run inside one circuit permit
    async fn execute_with_retries(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.build_url(&request.target);
        let policy = &self.config.retry;
        let mut attempt = 0u32;
        let mut refreshed_auth = false;

        loop {
            let started = Instant::now();
            let failure = match self.send_once(&url, request).await {
                Ok(response) if response.status().is_success() => {
                    return self.read_body(&url, response, started).await;
                }
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::UNAUTHORIZED && !refreshed_auth {
                        if let Some(auth) = self.authenticator.as_ref().filter(|a| a.can_refresh()) {
                            warn!(url, "upstream rejected token, refreshing once");
                            auth.invalidate().await;
                            refreshed_auth = true;
                            continue;
                        }
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get(RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(parse_retry_after);

                        if attempt >= policy.max_retries {
                            return Err(Error::RateLimited {
                                retry_after_seconds: retry_after.map_or(0, |d| d.as_secs()),
                            });
                        }

                        let delay = retry_after.unwrap_or_else(|| policy.delay_for(attempt));
                        warn!(
                            url,
                            attempt = attempt + 1,
                            max_retries = policy.max_retries,
                            "rate limited (429), waiting {delay:?}"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    Error::http_status(status.as_u16(), body)
                }
                Err(e) => e,
            };

            if !failure.is_retryable() || attempt >= policy.max_retries {
                return Err(failure);
            }

            let delay = policy.delay_for(attempt);
            warn!(
                url,
                attempt = attempt + 1,
                max_retries = policy.max_retries,
                error = %failure,
                "transient upstream failure, retrying in {delay:?}"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let permit = self.breaker.try_acquire()?;
        let result = self.execute_with_retries(request).await;

        match &result {
            Ok(_) => permit.success(),
            Err(e) if e.counts_against_circuit() => permit.failure(),
            Err(_) => drop(permit),
        }
        result
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.config.base_url)
            .field("authenticator", &self.authenticator)
            .field("rate_limiter", &self.rate_limiter)
            .field("circuit", &self.breaker.state())
            .finish_non_exhaustive()
    }
}
