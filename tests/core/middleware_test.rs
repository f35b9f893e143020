//! Onion ordering, short-circuiting and the built-in middleware units.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use socialconnector::middleware::{
    Payload, RateLimitMiddleware, RetryMiddleware, Terminal, ValidationMiddleware,
};
use socialconnector::resilience::{KeyedRateLimiter, RateLimitConfig, RetryPolicy};
use socialconnector::{
    CallContext, CallOutcome, ConnectorError, ErrorKind, MessageResponse, Middleware, Next,
    Pipeline,
};

type Log = Arc<Mutex<Vec<String>>>;

fn record(log: &Log, entry: impl Into<String>) {
    if let Ok(mut log) = log.lock() {
        log.push(entry.into());
    }
}

fn entries(log: &Log) -> Vec<String> {
    match log.lock() {
        Ok(log) => log.clone(),
        Err(err) => panic!("log lock poisoned: {err}"),
    }
}

/// Records `<name>-pre` and `<name>-post` around the inner call.
struct Recorder {
    name: &'static str,
    log: Log,
}

#[async_trait]
impl Middleware for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(
        &self,
        ctx: &mut CallContext,
        next: Next<'_>,
    ) -> Result<CallOutcome, ConnectorError> {
        record(&self.log, format!("{}-pre", self.name));
        let result = next.run(ctx).await;
        record(&self.log, format!("{}-post", self.name));
        result
    }
}

/// Answers without calling inward.
struct ShortCircuit;

#[async_trait]
impl Middleware for ShortCircuit {
    fn name(&self) -> &str {
        "short-circuit"
    }

    async fn handle(
        &self,
        _ctx: &mut CallContext,
        _next: Next<'_>,
    ) -> Result<CallOutcome, ConnectorError> {
        Ok(CallOutcome::Sent(MessageResponse::sent("test", "cached")))
    }
}

/// Rewrites outbound text before it reaches the terminal.
struct Shout;

#[async_trait]
impl Middleware for Shout {
    fn name(&self) -> &str {
        "shout"
    }

    async fn handle(
        &self,
        ctx: &mut CallContext,
        next: Next<'_>,
    ) -> Result<CallOutcome, ConnectorError> {
        if let Payload::SendMessage { text, .. } = &mut ctx.payload {
            *text = text.to_uppercase();
        }
        next.run(ctx).await
    }
}

/// Terminal that logs and echoes the text it received as the message id.
struct EchoTerminal {
    log: Log,
    calls: AtomicU32,
    fail_first: u32,
}

impl EchoTerminal {
    fn new(log: &Log) -> Self {
        Self {
            log: Arc::clone(log),
            calls: AtomicU32::new(0),
            fail_first: 0,
        }
    }
}

#[async_trait]
impl Terminal for EchoTerminal {
    async fn call(&self, ctx: &mut CallContext) -> Result<CallOutcome, ConnectorError> {
        record(&self.log, "terminal");
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(ConnectorError::connection("test", "flaky"));
        }
        match &ctx.payload {
            Payload::SendMessage { text, .. } => Ok(CallOutcome::Sent(MessageResponse::sent(
                "test",
                text.clone(),
            ))),
            _ => Ok(CallOutcome::Skipped),
        }
    }
}

fn send(chat: &str, text: &str) -> CallContext {
    CallContext::outbound(
        "test",
        Some(chat.to_owned()),
        Payload::SendMessage {
            text: text.to_owned(),
            reply_to: None,
        },
    )
}

fn recorder(name: &'static str, log: &Log) -> Recorder {
    Recorder {
        name,
        log: Arc::clone(log),
    }
}

#[tokio::test]
async fn units_wrap_the_terminal_like_an_onion() {
    let log: Log = Arc::default();
    let pipeline = Pipeline::new()
        .with(recorder("A", &log))
        .with(recorder("B", &log))
        .with(recorder("C", &log));
    assert_eq!(pipeline.names(), vec!["A", "B", "C"]);

    let terminal = EchoTerminal::new(&log);
    let mut ctx = send("chat", "hi");
    let outcome = pipeline.execute(&mut ctx, &terminal).await;
    assert!(outcome.is_ok());
    assert_eq!(
        entries(&log),
        vec!["A-pre", "B-pre", "C-pre", "terminal", "C-post", "B-post", "A-post"]
    );
}

#[tokio::test]
async fn short_circuit_skips_inner_units_and_terminal() {
    let log: Log = Arc::default();
    let pipeline = Pipeline::new()
        .with(recorder("A", &log))
        .with(ShortCircuit)
        .with(recorder("C", &log));

    let terminal = EchoTerminal::new(&log);
    let mut ctx = send("chat", "hi");
    let outcome = pipeline.execute(&mut ctx, &terminal).await;

    let response = outcome
        .and_then(|o| o.into_sent("test"))
        .expect("short-circuit answer");
    assert_eq!(response.message_id.as_deref(), Some("cached"));
    assert_eq!(entries(&log), vec!["A-pre", "A-post"]);
}

#[tokio::test]
async fn empty_pipeline_calls_terminal_directly() {
    let log: Log = Arc::default();
    let terminal = EchoTerminal::new(&log);
    let mut ctx = send("chat", "hi");
    let outcome = Pipeline::new().execute(&mut ctx, &terminal).await;
    assert!(outcome.is_ok());
    assert_eq!(entries(&log), vec!["terminal"]);
}

#[tokio::test]
async fn units_can_rewrite_the_payload() {
    let log: Log = Arc::default();
    let terminal = EchoTerminal::new(&log);
    let mut ctx = send("chat", "quiet please");
    let response = Pipeline::new()
        .with(Shout)
        .execute(&mut ctx, &terminal)
        .await
        .and_then(|o| o.into_sent("test"))
        .expect("sent");
    assert_eq!(response.message_id.as_deref(), Some("QUIET PLEASE"));
}

#[tokio::test]
async fn validation_rejects_before_the_terminal() {
    let log: Log = Arc::default();
    let terminal = EchoTerminal::new(&log);
    let mut ctx = send("chat", "");
    let err = Pipeline::new()
        .with(ValidationMiddleware::default())
        .execute(&mut ctx, &terminal)
        .await
        .expect_err("empty text");
    assert_eq!(err.kind(), ErrorKind::Message);
    assert!(entries(&log).is_empty());
}

#[tokio::test(start_paused = true)]
async fn retry_unit_reruns_inner_layers() {
    let log: Log = Arc::default();
    let terminal = EchoTerminal {
        fail_first: 2,
        ..EchoTerminal::new(&log)
    };
    let pipeline = Pipeline::new()
        .with(RetryMiddleware::new(RetryPolicy::default().without_jitter()))
        .with(recorder("inner", &log));

    let mut ctx = send("chat", "hi");
    let outcome = pipeline.execute(&mut ctx, &terminal).await;
    assert!(outcome.is_ok());
    assert_eq!(terminal.calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        entries(&log).iter().filter(|e| e.as_str() == "inner-pre").count(),
        3
    );
}

#[tokio::test(start_paused = true)]
async fn retry_unit_does_not_retry_permanent_errors() {
    struct Reject;

    #[async_trait]
    impl Terminal for Reject {
        async fn call(&self, _ctx: &mut CallContext) -> Result<CallOutcome, ConnectorError> {
            Err(ConnectorError::authentication("test", "revoked"))
        }
    }

    let mut ctx = send("chat", "hi");
    let err = Pipeline::new()
        .with(RetryMiddleware::default())
        .execute(&mut ctx, &Reject)
        .await
        .expect_err("permanent");
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test(start_paused = true)]
async fn per_chat_rate_limit_keeps_chats_independent() {
    let keyed = match KeyedRateLimiter::new(
        "test",
        RateLimitConfig::new(1, 0.5).with_timeout(Duration::from_millis(10)),
    ) {
        Ok(keyed) => Arc::new(keyed),
        Err(err) => panic!("valid limiter: {err}"),
    };
    let pipeline = Pipeline::new().with(RateLimitMiddleware::per_chat(keyed));
    let log: Log = Arc::default();
    let terminal = EchoTerminal::new(&log);

    assert!(pipeline.execute(&mut send("a", "1"), &terminal).await.is_ok());
    assert!(pipeline.execute(&mut send("b", "1"), &terminal).await.is_ok());

    let err = pipeline
        .execute(&mut send("a", "2"), &terminal)
        .await
        .expect_err("chat a is out of tokens");
    assert_eq!(err.kind(), ErrorKind::RateLimit);
}

/// Replaces any inner failure with a message error.
struct Mask;

#[async_trait]
impl Middleware for Mask {
    fn name(&self) -> &str {
        "mask"
    }

    async fn handle(
        &self,
        ctx: &mut CallContext,
        next: Next<'_>,
    ) -> Result<CallOutcome, ConnectorError> {
        next.run(ctx)
            .await
            .map_err(|err| ConnectorError::message("test", format!("masked: {err}")))
    }
}

#[tokio::test]
async fn outer_post_steps_run_around_a_failing_terminal() {
    let log: Log = Arc::default();
    let terminal = EchoTerminal {
        fail_first: 1,
        ..EchoTerminal::new(&log)
    };
    let pipeline = Pipeline::new()
        .with(recorder("A", &log))
        .with(recorder("B", &log));

    let err = pipeline
        .execute(&mut send("chat", "hi"), &terminal)
        .await
        .expect_err("terminal fails");
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(
        entries(&log),
        vec!["A-pre", "B-pre", "terminal", "B-post", "A-post"]
    );
}

#[tokio::test]
async fn units_can_replace_inner_failures() {
    let log: Log = Arc::default();
    let terminal = EchoTerminal {
        fail_first: 1,
        ..EchoTerminal::new(&log)
    };
    let pipeline = Pipeline::new()
        .with(recorder("A", &log))
        .with(Mask)
        .with(recorder("C", &log));

    let err = pipeline
        .execute(&mut send("chat", "hi"), &terminal)
        .await
        .expect_err("still fails");
    assert_eq!(err.kind(), ErrorKind::Message);
    assert!(err.to_string().contains("masked"));
    assert_eq!(
        entries(&log),
        vec!["A-pre", "C-pre", "terminal", "C-post", "A-post"]
    );
}

