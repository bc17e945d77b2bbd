//! Circuit breaker shared by every entity talking to one upstream
//!
//! ```text
//!            failures >= failure_threshold
//!   CLOSED ────────────────────────────────▶ OPEN
//!     ▲                                      │  recovery_timeout elapsed
//!     │ successes >= success_threshold       ▼
//!     └──────────────────────────────── HALF_OPEN ──(any failure)──▶ OPEN
//! ```
//!
//! In `HalfOpen` only one trial call is in flight at a time; everything else
//! fails fast with [`Error::CircuitOpen`] without touching the network.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Runtime circuit state for upstream calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call
    #[serde(with = "duration_secs", rename = "recovery_timeout_secs")]
    pub recovery_timeout: Duration,
    /// Consecutive trial successes needed to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if secs.is_finite() && secs >= 0.0 {
            Ok(Duration::from_secs_f64(secs))
        } else {
            Err(serde::de::Error::custom("duration must be a non-negative number of seconds"))
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

/// Thread-safe circuit breaker for upstream requests
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move OPEN to HALF_OPEN once the recovery timeout has passed
    fn refresh(&self, inner: &mut CircuitInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .is_some_and(|opened_at| opened_at.elapsed() >= self.config.recovery_timeout);
        if elapsed {
            info!("circuit half-open, allowing a trial request");
            inner.state = CircuitState::HalfOpen;
            inner.opened_at = None;
            inner.half_open_successes = 0;
            inner.trial_in_flight = false;
        }
    }

    fn open(&self, inner: &mut CircuitInner) {
        warn!(
            failures = inner.consecutive_failures,
            "circuit opened, failing fast for {:?}", self.config.recovery_timeout
        );
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.half_open_successes = 0;
        inner.trial_in_flight = false;
    }

    fn retry_in(&self, inner: &CircuitInner) -> Duration {
        inner
            .opened_at
            .map(|opened_at| self.config.recovery_timeout.saturating_sub(opened_at.elapsed()))
            .unwrap_or_default()
    }

    /// Ask for permission to make one logical call
    ///
    /// The returned permit must be resolved with [`CircuitPermit::success`],
    /// [`CircuitPermit::failure`] or dropped (neutral outcome).
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>> {
        let mut inner = self.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(CircuitPermit {
                breaker: self,
                trial: false,
                resolved: false,
            }),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(CircuitPermit {
                    breaker: self,
                    trial: true,
                    resolved: false,
                })
            }
            CircuitState::HalfOpen | CircuitState::Open => Err(Error::CircuitOpen {
                retry_in_ms: self.retry_in(&inner).as_millis() as u64,
            }),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    info!("circuit closed after successful trial requests");
                    inner.state = CircuitState::Closed;
                    inner.half_open_successes = 0;
                }
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            CircuitState::HalfOpen => self.open(&mut inner),
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                self.open(&mut inner);
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

/// Permission for one call through the breaker
#[derive(Debug)]
#[must_use = "a permit must be resolved with success() or failure()"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl CircuitPermit<'_> {
    /// Whether this call is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.record_failure();
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        // Cancelled or neutral calls free the half-open slot without a verdict
        if !self.resolved && self.trial {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, recovery_ms: u64, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: failures,
            recovery_timeout: Duration::from_millis(recovery_ms),
            success_threshold: successes,
        })
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = breaker(2, 10_000, 1);

        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = breaker.try_acquire().unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { .. }));
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = breaker(3, 10_000, 1);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_needs_success_threshold_to_close() {
        let breaker = breaker(1, 50, 2);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let permit = breaker.try_acquire().unwrap();
        assert!(permit.is_trial());
        // Only one trial at a time
        assert!(breaker.try_acquire().is_err());
        permit.success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.try_acquire().unwrap().success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_and_resets_timer() {
        let breaker = breaker(1, 50, 1);
        breaker.record_failure();
        tokio::time::advance(Duration::from_millis(60)).await;

        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(30)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_millis(30)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trial_frees_the_slot() {
        let breaker = breaker(1, 10, 1);
        breaker.record_failure();
        tokio::time::advance(Duration::from_millis(20)).await;

        drop(breaker.try_acquire().unwrap());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn config_from_yaml() {
        let config: CircuitBreakerConfig =
            serde_yaml::from_str("failure_threshold: 7\nrecovery_timeout_secs: 1.5\n").unwrap();
        assert_eq!(config.failure_threshold, 7);
        assert_eq!(config.recovery_timeout, Duration::from_millis(1500));
        assert_eq!(config.success_threshold, 2);
    }
}
