//! Circuit breaker state machine under paused tokio time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use socialconnector::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use socialconnector::{ConnectorError, ErrorKind};

fn breaker(threshold: u32, open_secs: u64) -> CircuitBreaker {
    CircuitBreaker::new(
        "test",
        CircuitBreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_secs(open_secs),
        },
    )
}

async fn fail(breaker: &CircuitBreaker) -> Result<(), ConnectorError> {
    breaker
        .call(|| async { Err::<(), _>(ConnectorError::connection("test", "boom")) })
        .await
}

async fn succeed(breaker: &CircuitBreaker) -> Result<(), ConnectorError> {
    breaker.call(|| async { Ok(()) }).await
}

#[tokio::test(start_paused = true)]
async fn opens_after_threshold_and_skips_the_operation() {
    let breaker = breaker(3, 30);
    for _ in 0..3 {
        assert_eq!(
            fail(&breaker).await.map_err(|e| e.kind()),
            Err(ErrorKind::Connection)
        );
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let invoked = AtomicUsize::new(0);
    let result = breaker
        .call(|| async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    let err = result.expect_err("open circuit should reject");
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn success_resets_the_failure_count() {
    let breaker = breaker(3, 30);
    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    assert_eq!(breaker.consecutive_failures(), 2);

    assert!(succeed(&breaker).await.is_ok());
    assert_eq!(breaker.consecutive_failures(), 0);

    let _ = fail(&breaker).await;
    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn open_reports_remaining_time() {
    let breaker = breaker(1, 30);
    let _ = fail(&breaker).await;
    tokio::time::advance(Duration::from_secs(10)).await;

    let err = succeed(&breaker).await.expect_err("still open");
    assert_eq!(err.retry_after(), Some(Duration::from_secs(20)));
    assert_eq!(err.details()["state"], "open");
}

#[tokio::test(start_paused = true)]
async fn trial_success_closes_the_circuit() {
    let breaker = breaker(1, 30);
    let _ = fail(&breaker).await;
    tokio::time::advance(Duration::from_secs(30)).await;

    assert!(succeed(&breaker).await.is_ok());
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn trial_failure_reopens_for_a_full_window() {
    let breaker = breaker(1, 30);
    let _ = fail(&breaker).await;
    tokio::time::advance(Duration::from_secs(31)).await;

    assert!(fail(&breaker).await.is_err());
    assert_eq!(breaker.state(), CircuitState::Open);

    let err = succeed(&breaker).await.expect_err("re-opened");
    assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
}

#[tokio::test(start_paused = true)]
async fn only_one_trial_is_admitted() {
    let breaker = breaker(1, 5);
    let _ = fail(&breaker).await;
    tokio::time::advance(Duration::from_secs(5)).await;

    let trial = breaker.try_acquire().expect("first caller gets the trial");
    assert!(trial.is_trial());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let err = breaker.try_acquire().expect_err("second caller fails fast");
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(err.retry_after(), Some(Duration::ZERO));

    trial.success();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.try_acquire().is_ok());
}

#[tokio::test(start_paused = true)]
async fn dropped_trial_frees_the_slot() {
    let breaker = breaker(1, 5);
    let _ = fail(&breaker).await;
    tokio::time::advance(Duration::from_secs(5)).await;

    drop(breaker.try_acquire().expect("trial"));
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let again = breaker.try_acquire().expect("slot was released");
    assert!(again.is_trial());
    again.failure();
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn configuration_errors_do_not_count() {
    let breaker = breaker(1, 30);
    let result = breaker
        .call(|| async { Err::<(), _>(ConnectorError::configuration("test", "bad input")) })
        .await;
    assert!(result.is_err());
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn reset_closes_an_open_circuit() {
    let breaker = breaker(1, 300);
    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    breaker.reset();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(succeed(&breaker).await.is_ok());
}

#[test]
fn zero_threshold_acts_as_one() {
    let breaker = breaker(0, 30);
    let permit = breaker.try_acquire().expect("closed");
    permit.failure();
    assert_eq!(breaker.state(), CircuitState::Open);
}
