//! Token-bucket rate limiting.
//!
//! Refill is lazy: tokens are topped up from elapsed time whenever the bucket
//! is inspected. The bucket lives behind a sync [`Mutex`] and the deduction
//! happens in one critical section, so a cancelled `acquire` never consumes a
//! token it did not return with.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::ConnectorError;

// Absorbs float drift so a bucket that refilled for exactly the right time
// is not reported a nanosecond short.
const EPSILON: f64 = 1e-9;

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum tokens the bucket holds. Also the burst size.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
    /// How long `acquire` waits for a token. `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl RateLimitConfig {
    /// A bucket of `capacity` tokens refilling at `refill_per_sec`.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            acquire_timeout: None,
        }
    }

    /// Bound how long `acquire` may wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// A bucket allowing `per_second` requests per second with no burst.
    pub fn per_second(per_second: f64) -> Self {
        Self::new(1, per_second)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 30,
            refill_per_sec: 30.0,
            acquire_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Async token-bucket limiter.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    capacity: f64,
    refill_per_sec: f64,
    acquire_timeout: Option<Duration>,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a full bucket. `name` is the platform tag used in errors.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] when the capacity is zero or
    /// the refill rate is not a positive finite number.
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Result<Self, ConnectorError> {
        let name = name.into();
        if config.capacity == 0 {
            return Err(ConnectorError::configuration(
                &name,
                "rate limiter capacity must be at least 1",
            ));
        }
        if !config.refill_per_sec.is_finite() || config.refill_per_sec <= 0.0 {
            return Err(ConnectorError::configuration(
                &name,
                format!("rate limiter refill rate must be positive, got {}", config.refill_per_sec),
            ));
        }
        Ok(Self::from_validated(name, config))
    }

    fn from_validated(name: String, config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.capacity);
        Self {
            name,
            capacity,
            refill_per_sec: config.refill_per_sec,
            acquire_timeout: config.acquire_timeout,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Platform tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tokens currently available, after refill.
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    /// Whether the bucket is back at capacity, i.e. indistinguishable from a
    /// fresh one.
    pub fn is_full(&self) -> bool {
        self.available() + EPSILON >= self.capacity
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.take(Instant::now()).is_ok()
    }

    /// Wait for a token, bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::RateLimit`] when no token became available
    /// before the timeout.
    pub async fn acquire(&self) -> Result<(), ConnectorError> {
        match self.acquire_timeout {
            Some(timeout) => self.acquire_within(timeout).await,
            None => {
                loop {
                    match self.take(Instant::now()) {
                        Ok(()) => return Ok(()),
                        Err(wait) => tokio::time::sleep(wait).await,
                    }
                }
            }
        }
    }

    /// Wait for a token for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::RateLimit`] carrying the time until the next
    /// token when the deadline passes first.
    pub async fn acquire_within(&self, timeout: Duration) -> Result<(), ConnectorError> {
        let start = Instant::now();
        let deadline = start.checked_add(timeout);
        loop {
            let now = Instant::now();
            let wait = match self.take(now) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(now),
                None => wait,
            };
            if remaining.is_zero() {
                debug!(limiter = %self.name, wait_ms = wait.as_millis(), "rate limit wait timed out");
                return Err(ConnectorError::rate_limit(
                    &self.name,
                    format!("no token available within {timeout:?}"),
                    wait,
                ));
            }
            tokio::time::sleep(wait.min(remaining)).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            bucket.last_refill = now;
        }
    }

    /// Deduct one token, or report how long until one is available.
    fn take(&self, now: Instant) -> Result<(), Duration> {
        let mut bucket = self.lock();
        self.refill(&mut bucket, now);
        if bucket.tokens + EPSILON >= 1.0 {
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
            return Ok(());
        }
        let missing = 1.0 - bucket.tokens;
        let secs = missing / self.refill_per_sec;
        let wait = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        // Never ask the caller to sleep for zero; that would spin.
        Err(wait.max(Duration::from_millis(1)))
    }
}

/// Key count at which `bucket` first sweeps idle buckets.
const SWEEP_FLOOR: usize = 256;

/// One token bucket per key, created on first use.
///
/// Used to keep per-chat ordering and fairness: a burst to one chat does not
/// drain the budget of another. Buckets that have refilled completely and
/// are not held by a caller are dropped when the table grows, so memory
/// tracks recently active keys rather than every key ever seen.
#[derive(Debug)]
pub struct KeyedRateLimiter {
    name: String,
    config: RateLimitConfig,
    buckets: Mutex<KeyedBuckets>,
}

#[derive(Debug)]
struct KeyedBuckets {
    map: HashMap<String, Arc<RateLimiter>>,
    sweep_at: usize,
}

impl KeyedBuckets {
    fn evict_idle(&mut self) -> usize {
        let before = self.map.len();
        self.map
            .retain(|_, bucket| Arc::strong_count(bucket) > 1 || !bucket.is_full());
        before.saturating_sub(self.map.len())
    }
}

impl KeyedRateLimiter {
    /// Create an empty keyed limiter. Validates `config` up front.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] for the same inputs
    /// [`RateLimiter::new`] rejects.
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Result<Self, ConnectorError> {
        let name = name.into();
        RateLimiter::new(name.clone(), config)?;
        Ok(Self {
            name,
            config,
            buckets: Mutex::new(KeyedBuckets {
                map: HashMap::new(),
                sweep_at: SWEEP_FLOOR,
            }),
        })
    }

    /// Bucket for `key`, created full on first use.
    pub fn bucket(&self, key: &str) -> Arc<RateLimiter> {
        let mut buckets = self.lock();
        if let Some(existing) = buckets.map.get(key) {
            return Arc::clone(existing);
        }
        if buckets.map.len() >= buckets.sweep_at {
            let evicted = buckets.evict_idle();
            buckets.sweep_at = buckets.map.len().saturating_mul(2).max(SWEEP_FLOOR);
            debug!(limiter = %self.name, evicted, kept = buckets.map.len(), "swept idle buckets");
        }
        let limiter = Arc::new(RateLimiter::from_validated(self.name.clone(), self.config));
        buckets.map.insert(key.to_owned(), Arc::clone(&limiter));
        limiter
    }

    /// Drop buckets that are full and not held elsewhere. Returns how many
    /// were dropped.
    pub fn evict_idle(&self) -> usize {
        self.lock().evict_idle()
    }

    /// Wait for a token in `key`'s bucket.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::RateLimit`] when the bucket's timeout passes.
    pub async fn acquire(&self, key: &str) -> Result<(), ConnectorError> {
        self.bucket(key).acquire().await
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    /// Whether no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, KeyedBuckets> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
