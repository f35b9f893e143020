//! Structured logging around each call. Never touches the payload.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{CallContext, CallOutcome, Middleware, Next};
use crate::error::ConnectorError;

/// Logs operation, platform, chat, duration and outcome of every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(
        &self,
        ctx: &mut CallContext,
        next: Next<'_>,
    ) -> Result<CallOutcome, ConnectorError> {
        let operation = ctx.operation();
        let platform = ctx.platform.clone();
        let chat_id = ctx.chat_id.clone().unwrap_or_default();
        let direction = ctx.direction;
        debug!(%platform, operation, chat_id = %chat_id, ?direction, "call started");

        let start = Instant::now();
        let result = next.run(ctx).await;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(outcome) => debug!(
                %platform,
                operation,
                chat_id = %chat_id,
                elapsed_ms,
                outcome = outcome.variant(),
                "call completed"
            ),
            Err(e) => warn!(
                %platform,
                operation,
                chat_id = %chat_id,
                elapsed_ms,
                kind = %e.kind(),
                error = %e,
                "call failed"
            ),
        }
        result
    }
}
