//! Token-bucket throttling of outbound calls.

use std::sync::Arc;

use async_trait::async_trait;

use super::{CallContext, CallOutcome, Direction, Middleware, Next};
use crate::error::ConnectorError;
use crate::resilience::{KeyedRateLimiter, RateLimiter};

#[derive(Debug)]
enum Buckets {
    Shared(Arc<RateLimiter>),
    PerChat(Arc<KeyedRateLimiter>),
}

/// Waits for a token before every outbound call. Inbound events pass
/// through untouched.
///
/// With per-chat buckets, calls without a chat id share one bucket keyed by
/// the platform name.
#[derive(Debug)]
pub struct RateLimitMiddleware {
    buckets: Buckets,
}

impl RateLimitMiddleware {
    /// One bucket for every outbound call.
    pub fn shared(limiter: Arc<RateLimiter>) -> Self {
        Self {
            buckets: Buckets::Shared(limiter),
        }
    }

    /// One bucket per chat id.
    pub fn per_chat(limiter: Arc<KeyedRateLimiter>) -> Self {
        Self {
            buckets: Buckets::PerChat(limiter),
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn handle(
        &self,
        ctx: &mut CallContext,
        next: Next<'_>,
    ) -> Result<CallOutcome, ConnectorError> {
        if ctx.direction == Direction::Outbound {
            match &self.buckets {
                Buckets::Shared(limiter) => limiter.acquire().await?,
                Buckets::PerChat(keyed) => {
                    let key = ctx.chat_id.as_deref().unwrap_or(ctx.platform.as_str());
                    keyed.acquire(key).await?;
                }
            }
        }
        next.run(ctx).await
    }
}
