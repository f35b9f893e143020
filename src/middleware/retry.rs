//! Explicit retry of transient failures for the units inside it.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{CallContext, CallOutcome, Middleware, Next};
use crate::error::ConnectorError;
use crate::resilience::RetryPolicy;

/// Re-runs the inner chain when it fails with a retryable error.
///
/// Every unit registered after this one, and the adapter call itself, runs
/// again on each attempt. The context is restored to its pre-call state
/// between attempts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryMiddleware {
    policy: RetryPolicy,
}

impl RetryMiddleware {
    /// Retry with `policy`.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    async fn handle(
        &self,
        ctx: &mut CallContext,
        next: Next<'_>,
    ) -> Result<CallOutcome, ConnectorError> {
        let original = ctx.clone();
        let mut attempt: u32 = 0;
        loop {
            match next.run(ctx).await {
                Err(err) if self.policy.should_retry(attempt, &err) => {
                    let delay = self.policy.delay_for(attempt, &err);
                    warn!(
                        platform = %ctx.platform,
                        operation = ctx.operation(),
                        attempt = attempt.saturating_add(1),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        kind = %err.kind(),
                        "retrying call"
                    );
                    tokio::time::sleep(delay).await;
                    *ctx = original.clone();
                    attempt = attempt.saturating_add(1);
                }
                Err(err) => {
                    if err.is_retryable() {
                        debug!(
                            platform = %ctx.platform,
                            operation = ctx.operation(),
                            attempts = attempt.saturating_add(1),
                            "giving up after retries"
                        );
                    }
                    return Err(err);
                }
                ok => return ok,
            }
        }
    }
}
