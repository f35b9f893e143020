//! Retry policy applied through its middleware, with paused time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use socialconnector::middleware::{
    CallContext, CallOutcome, Payload, Pipeline, RetryMiddleware, Terminal,
};
use socialconnector::resilience::RetryPolicy;
use socialconnector::{ConnectorError, ErrorKind};

/// Terminal that fails with `error(attempt)` until it returns `None`.
struct Scripted {
    attempts: AtomicU32,
    error: fn(u32) -> Option<ConnectorError>,
}

impl Scripted {
    fn new(error: fn(u32) -> Option<ConnectorError>) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            error,
        }
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Terminal for Scripted {
    async fn call(&self, ctx: &mut CallContext) -> Result<CallOutcome, ConnectorError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        ctx.metadata.insert(format!("attempt-{attempt}"), true.into());
        match (self.error)(attempt) {
            Some(err) => Err(err),
            None => Ok(CallOutcome::Skipped),
        }
    }
}

fn ctx() -> CallContext {
    CallContext::outbound(
        "test",
        Some("chat".to_owned()),
        Payload::SendMessage {
            text: "hi".to_owned(),
            reply_to: None,
        },
    )
}

async fn run(policy: RetryPolicy, terminal: &Scripted) -> Result<CallOutcome, ConnectorError> {
    Pipeline::new()
        .with(RetryMiddleware::new(policy))
        .execute(&mut ctx(), terminal)
        .await
}

#[tokio::test(start_paused = true)]
async fn retries_transient_errors_until_success() {
    let terminal = Scripted::new(|attempt| {
        (attempt < 2).then(|| ConnectorError::connection("test", "reset by peer"))
    });
    let start = Instant::now();

    let result = run(RetryPolicy::default().without_jitter(), &terminal).await;

    assert!(matches!(result, Ok(CallOutcome::Skipped)));
    assert_eq!(terminal.attempts(), 3);
    // 1s + 2s of backoff.
    assert!(start.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_retries() {
    let terminal = Scripted::new(|_| Some(ConnectorError::connection("test", "down")));
    let policy = RetryPolicy::default().without_jitter().with_max_retries(2);

    let result = run(policy, &terminal).await;

    assert_eq!(result.map_err(|e| e.kind()).err(), Some(ErrorKind::Connection));
    assert_eq!(terminal.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn permanent_errors_are_not_retried() {
    let terminal =
        Scripted::new(|_| Some(ConnectorError::authentication("test", "token revoked")));

    let result = run(RetryPolicy::default(), &terminal).await;

    assert_eq!(result.map_err(|e| e.kind()).err(), Some(ErrorKind::Authentication));
    assert_eq!(terminal.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_honours_retry_after() {
    let terminal = Scripted::new(|attempt| {
        (attempt == 0)
            .then(|| ConnectorError::rate_limit("test", "slow down", Duration::from_secs(5)))
    });
    let policy = RetryPolicy {
        initial_delay: Duration::from_millis(10),
        ..RetryPolicy::default().without_jitter()
    };
    let start = Instant::now();

    assert!(run(policy, &terminal).await.is_ok());
    assert!(start.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn none_policy_runs_once() {
    let terminal = Scripted::new(|_| Some(ConnectorError::connection("test", "down")));
    assert!(run(RetryPolicy::none(), &terminal).await.is_err());
    assert_eq!(terminal.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn context_is_restored_between_attempts() {
    let terminal = Scripted::new(|attempt| {
        (attempt == 0).then(|| ConnectorError::connection("test", "flaky"))
    });
    let mut ctx = ctx();

    let result = Pipeline::new()
        .with(RetryMiddleware::new(RetryPolicy::default().without_jitter()))
        .execute(&mut ctx, &terminal)
        .await;

    assert!(result.is_ok());
    assert!(!ctx.metadata.contains_key("attempt-0"));
    assert!(ctx.metadata.contains_key("attempt-1"));
}
