//! Consecutive-failure circuit breaker with lazy half-open trials.
//!
//! State lives behind a sync [`Mutex`]: every critical section is a few
//! field updates with no `.await`, so the fast-fail decision and the state
//! transition are always observed together.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ConnectorError;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow; failures are counted.
    Closed,
    /// Calls fail immediately without reaching the provider.
    Open,
    /// One trial call is being admitted to test recovery.
    HalfOpen,
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker. Values below 1 act as 1.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a trial call.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_transition: Instant,
    trial_in_flight: bool,
}

/// Circuit breaker for one adapter (or one provider, when shared).
///
/// Half-open admission is first-caller-wins: the call that observes the
/// expired open window becomes the trial, and every other caller fails fast
/// with [`ConnectorError::CircuitOpen`] until the trial settles.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker. `name` is the platform tag used in errors.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_transition: Instant::now(),
                trial_in_flight: false,
            }),
        }
    }

    /// Platform tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective configuration.
    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Stored state. An expired open window is only reported as half-open
    /// once a call has arrived to test it.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Failures counted since the last success or reset.
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Force the breaker closed and clear its counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
        inner.last_transition = Instant::now();
        info!(breaker = %self.name, "circuit breaker manually reset");
    }

    /// Ask for permission to make a call.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::CircuitOpen`] while open, or while half-open
    /// with a trial already in flight.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>, ConnectorError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(CircuitPermit::new(self, false)),
            CircuitState::Open => {
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(inner.last_transition);
                if elapsed >= self.config.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.last_transition = now;
                    inner.trial_in_flight = true;
                    info!(breaker = %self.name, "circuit half-open, admitting trial call");
                    Ok(CircuitPermit::new(self, true))
                } else {
                    let remaining = self.config.open_duration.saturating_sub(elapsed);
                    Err(ConnectorError::circuit_open(&self.name, remaining)
                        .with_detail("state", "open"))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    debug!(breaker = %self.name, "trial in flight, rejecting call");
                    Err(ConnectorError::circuit_open(&self.name, Duration::ZERO)
                        .with_detail("state", "half_open"))
                } else {
                    inner.trial_in_flight = true;
                    Ok(CircuitPermit::new(self, true))
                }
            }
        }
    }

    /// Run `op` through the breaker, recording its outcome.
    ///
    /// Dropping the returned future before `op` completes abandons the call
    /// without counting it either way.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::CircuitOpen`] without invoking `op` when the
    /// breaker rejects the call, otherwise whatever `op` returns.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ConnectorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ConnectorError>>,
    {
        let permit = self.try_acquire()?;
        let result = op().await;
        permit.record(&result);
        result
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.trial_in_flight = false;
                inner.last_transition = Instant::now();
                info!(breaker = %self.name, "trial call succeeded, circuit closed");
            }
            // Stale results from calls admitted before the breaker tripped.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_transition = Instant::now();
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        open_for_ms = u64::try_from(self.config.open_duration.as_millis()).unwrap_or(u64::MAX),
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
                inner.last_transition = Instant::now();
                warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
            debug!(breaker = %self.name, "trial call abandoned, slot released");
        }
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
///
/// Settle it with [`CircuitPermit::record`], [`CircuitPermit::success`] or
/// [`CircuitPermit::failure`]. Dropping an unsettled trial permit frees the
/// trial slot without changing state.
#[derive(Debug)]
#[must_use = "an unsettled permit records nothing"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> CircuitPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this permit is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record a successful call.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    /// Record a failed call.
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    /// Record `result`. Errors that say nothing about provider health are
    /// treated as neutral.
    pub fn record<T>(self, result: &Result<T, ConnectorError>) {
        match result {
            Ok(_) => self.success(),
            Err(err) if err.counts_against_breaker() => self.failure(),
            // Neutral outcome: Drop releases a trial slot without a transition.
            Err(_) => {}
        }
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}
