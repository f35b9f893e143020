//! Limiter-then-breaker ordering of the resilience gate.

use std::sync::Arc;
use std::time::Duration;

use socialconnector::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitConfig, RateLimiter,
    ResilienceGate,
};
use socialconnector::{ConnectorError, ErrorKind};

fn gate(limit: RateLimitConfig, threshold: u32) -> ResilienceGate {
    let limiter = match RateLimiter::new("test", limit) {
        Ok(limiter) => Arc::new(limiter),
        Err(err) => panic!("limiter config should be valid: {err}"),
    };
    let breaker = Arc::new(CircuitBreaker::new(
        "test",
        CircuitBreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_secs(30),
        },
    ));
    ResilienceGate::new(limiter, breaker)
}

#[tokio::test(start_paused = true)]
async fn limiter_timeout_is_not_a_breaker_failure() {
    let gate = gate(
        RateLimitConfig::new(1, 0.01).with_timeout(Duration::from_millis(100)),
        1,
    );
    assert!(gate.run(|| async { Ok(()) }).await.is_ok());

    let err = gate
        .run(|| async { Ok(()) })
        .await
        .expect_err("bucket is empty");
    assert_eq!(err.kind(), ErrorKind::RateLimit);
    assert_eq!(gate.breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn failures_through_the_gate_trip_the_breaker() {
    let gate = gate(RateLimitConfig::new(10, 10.0), 2);
    for _ in 0..2 {
        let result: Result<(), _> = gate
            .run(|| async { Err(ConnectorError::connection("test", "down")) })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(gate.breaker().state(), CircuitState::Open);

    let err = gate
        .run(|| async { Ok(()) })
        .await
        .expect_err("circuit is open");
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
}
