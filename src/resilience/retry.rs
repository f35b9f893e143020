//! Exponential backoff retry policy.

use std::time::Duration;

use rand::Rng;

use crate::error::ConnectorError;

/// Fraction of the computed delay added at most as jitter.
const MAX_JITTER_FRACTION: f64 = 0.25;

/// Exponential backoff: `min(initial * multiplier^attempt, max)`, plus up to
/// 25% jitter. Only [`ConnectorError::is_retryable`] errors are retried, and
/// rate-limit errors always wait at least their `retry_after`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the computed delay (before jitter).
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Whether to add random jitter.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(64),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Same policy with a different retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Same policy without jitter, for deterministic delays.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Deterministic backoff for the zero-based `attempt`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    /// Delay to sleep before retrying after `err` on the zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32, err: &ConnectorError) -> Duration {
        let mut delay = self.backoff(attempt);
        if self.jitter {
            let fraction = rand::thread_rng().gen_range(0.0..=MAX_JITTER_FRACTION);
            delay = delay.saturating_add(delay.mul_f64(fraction));
        }
        match err.retry_after() {
            Some(retry_after) if err.is_retryable() => delay.max(retry_after),
            _ => delay,
        }
    }

    /// Whether `err` on the zero-based `attempt` should be retried.
    pub fn should_retry(&self, attempt: u32, err: &ConnectorError) -> bool {
        attempt < self.max_retries && err.is_retryable()
    }
}
