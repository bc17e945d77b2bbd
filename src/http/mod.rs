//! Upstream transport and resilience
//!
//! Provides the [`Transport`] seam used by discovery and extraction, and its
//! HTTP implementation.
//!
//! # Features
//!
//! - **Circuit breaker**: one shared instance per upstream connection
//! - **Retries**: exponential backoff with jitter, `Retry-After` aware
//! - **Rate limiting**: optional token bucket using governor
//! - **Authentication**: integration with the auth module

mod circuit_breaker;
mod client;
mod rate_limit;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitState};
pub use client::{
    ApiRequest, ApiResponse, HttpClient, HttpClientConfig, HttpClientConfigBuilder, Transport,
};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use retry::{parse_retry_after, RetryPolicy};

#[cfg(test)]
mod tests;
