//! Rejects malformed outbound payloads before any network call.

use async_trait::async_trait;
use url::Url;

use super::{CallContext, CallOutcome, Direction, Middleware, Next, Payload};
use crate::error::ConnectorError;
use crate::models::{MediaSource, WebhookConfig, FILE_ID_KEY};

/// Default maximum message length, in characters.
pub const DEFAULT_MAX_TEXT_LEN: usize = 4096;

/// Default maximum `get_messages` page size.
pub const DEFAULT_MAX_FETCH_LIMIT: usize = 100;

/// Structural checks on outbound payloads.
///
/// Failures carry a `field` detail naming the offending argument.
#[derive(Debug, Clone, Copy)]
pub struct ValidationMiddleware {
    max_text_len: usize,
    max_fetch_limit: usize,
}

impl Default for ValidationMiddleware {
    fn default() -> Self {
        Self {
            max_text_len: DEFAULT_MAX_TEXT_LEN,
            max_fetch_limit: DEFAULT_MAX_FETCH_LIMIT,
        }
    }
}

impl ValidationMiddleware {
    /// Validator with custom limits.
    pub fn new(max_text_len: usize, max_fetch_limit: usize) -> Self {
        Self {
            max_text_len,
            max_fetch_limit,
        }
    }

    /// Check `ctx` without running anything.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::Message`], [`ConnectorError::Media`] or
    /// [`ConnectorError::Webhook`] describing the first problem found.
    pub fn validate(&self, ctx: &CallContext) -> Result<(), ConnectorError> {
        if ctx.direction == Direction::Inbound {
            return Ok(());
        }
        let platform = ctx.platform.as_str();
        match &ctx.payload {
            Payload::SendMessage { text, .. } => {
                require_chat(ctx)?;
                self.check_text(platform, "text", text)
            }
            Payload::SendMedia { media, caption } => {
                require_chat(ctx)?;
                match &media.source {
                    MediaSource::Url(url) if url.trim().is_empty() => {
                        return Err(invalid_media(platform, "media URL is empty"));
                    }
                    MediaSource::Bytes(bytes) if bytes.is_empty() => {
                        return Err(invalid_media(platform, "media content is empty"));
                    }
                    MediaSource::None if !media.raw.contains_key(FILE_ID_KEY) => {
                        return Err(invalid_media(
                            platform,
                            "media has no URL, content or platform file id",
                        ));
                    }
                    _ => {}
                }
                match caption {
                    Some(caption) => self.check_length(platform, "caption", caption),
                    None => Ok(()),
                }
            }
            Payload::EditMessage {
                message_id,
                new_text,
            } => {
                require_chat(ctx)?;
                require_non_empty(platform, "message_id", message_id)?;
                self.check_text(platform, "new_text", new_text)
            }
            Payload::DeleteMessage { message_id } => {
                require_chat(ctx)?;
                require_non_empty(platform, "message_id", message_id)
            }
            Payload::GetMessages { limit } => {
                require_chat(ctx)?;
                if *limit == 0 || *limit > self.max_fetch_limit {
                    return Err(invalid_message(
                        platform,
                        "limit",
                        format!("limit must be between 1 and {}, got {limit}", self.max_fetch_limit),
                    ));
                }
                Ok(())
            }
            Payload::GetUserInfo { user_id } => require_non_empty(platform, "user_id", user_id),
            Payload::SetWebhook { config } => check_webhook(platform, config),
            Payload::Post { text, media } => {
                if text.trim().is_empty() && media.is_empty() {
                    return Err(invalid_message(platform, "text", "post needs text or media"));
                }
                self.check_length(platform, "text", text)
            }
            Payload::Event { .. } => Ok(()),
        }
    }

    fn check_text(&self, platform: &str, field: &str, text: &str) -> Result<(), ConnectorError> {
        require_non_empty(platform, field, text)?;
        self.check_length(platform, field, text)
    }

    fn check_length(&self, platform: &str, field: &str, text: &str) -> Result<(), ConnectorError> {
        let len = text.chars().count();
        if len > self.max_text_len {
            return Err(invalid_message(
                platform,
                field,
                format!("{field} is {len} characters, maximum is {}", self.max_text_len),
            )
            .with_detail("length", len));
        }
        Ok(())
    }
}

fn require_chat(ctx: &CallContext) -> Result<(), ConnectorError> {
    match ctx.chat_id.as_deref() {
        Some(chat_id) if !chat_id.trim().is_empty() => Ok(()),
        _ => Err(invalid_message(&ctx.platform, "chat_id", "chat_id is required")),
    }
}

fn require_non_empty(platform: &str, field: &str, value: &str) -> Result<(), ConnectorError> {
    if value.trim().is_empty() {
        return Err(invalid_message(platform, field, format!("{field} must not be empty")));
    }
    Ok(())
}

fn check_webhook(platform: &str, config: &WebhookConfig) -> Result<(), ConnectorError> {
    let url = Url::parse(&config.url).map_err(|e| {
        ConnectorError::webhook(platform, format!("invalid webhook URL: {e}"))
            .with_detail("field", "url")
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConnectorError::webhook(
            platform,
            format!("webhook URL must be http or https, got '{}'", url.scheme()),
        )
        .with_detail("field", "url"));
    }
    Ok(())
}

fn invalid_message(platform: &str, field: &str, message: impl Into<String>) -> ConnectorError {
    ConnectorError::message(platform, message).with_detail("field", field)
}

fn invalid_media(platform: &str, message: &str) -> ConnectorError {
    ConnectorError::media(platform, message).with_detail("field", "media")
}

#[async_trait]
impl Middleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    async fn handle(
        &self,
        ctx: &mut CallContext,
        next: Next<'_>,
    ) -> Result<CallOutcome, ConnectorError> {
        self.validate(ctx)?;
        next.run(ctx).await
    }
}
