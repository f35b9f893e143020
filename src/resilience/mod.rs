//! Resilience primitives guarding every outbound provider call.
//!
//! Outbound calls pass the rate limiter first and the circuit breaker
//! second; [`ResilienceGate`] bundles the two in that order.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

use std::future::Future;
use std::sync::Arc;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitState};
pub use rate_limiter::{KeyedRateLimiter, RateLimitConfig, RateLimiter};
pub use retry::RetryPolicy;

use crate::error::ConnectorError;

/// Rate limiter and circuit breaker an adapter wraps around network calls.
///
/// Cheap to clone; clones share the same limiter and breaker.
#[derive(Debug, Clone)]
pub struct ResilienceGate {
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
}

impl ResilienceGate {
    /// Bundle a limiter and a breaker.
    pub fn new(limiter: Arc<RateLimiter>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { limiter, breaker }
    }

    /// Shared limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Shared breaker.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Wait for a token, then run `op` through the breaker.
    ///
    /// A limiter timeout fails before the breaker is consulted and is not
    /// counted against it.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::RateLimit`] from the limiter,
    /// [`ConnectorError::CircuitOpen`] from the breaker, or the error `op`
    /// returned.
    pub async fn run<F, Fut, T>(&self, op: F) -> Result<T, ConnectorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ConnectorError>>,
    {
        self.limiter.acquire().await?;
        self.breaker.call(op).await
    }
}
