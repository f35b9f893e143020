//! Onion-model middleware around every outbound call and inbound event.
//!
//! Units registered first are outermost: for units `[A, B, C]` the order is
//! A-pre, B-pre, C-pre, terminal, C-post, B-post, A-post. A unit may inspect
//! or rewrite the [`CallContext`] before calling [`Next::run`], inspect or
//! replace the outcome afterwards, or return without calling `next` at all
//! to short-circuit.

pub mod logging;
pub mod rate_limit;
pub mod retry;
pub mod validation;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

pub use logging::LoggingMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use retry::RetryMiddleware;
pub use validation::ValidationMiddleware;

use crate::error::ConnectorError;
use crate::events::EmitReport;
use crate::models::{Event, Media, Message, MessageResponse, RawMap, UserInfo, WebhookConfig};

// ---------------------------------------------------------------------------
// Call context
// ---------------------------------------------------------------------------

/// Which way a call is flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Caller to platform.
    Outbound,
    /// Platform to subscribers.
    Inbound,
}

/// Operation arguments, one variant per adapter operation plus inbound events.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `send_message`.
    SendMessage {
        /// Message text.
        text: String,
        /// Message being replied to.
        reply_to: Option<String>,
    },
    /// `send_media`.
    SendMedia {
        /// Attachment.
        media: Media,
        /// Optional caption.
        caption: Option<String>,
    },
    /// `edit_message`.
    EditMessage {
        /// Message to edit.
        message_id: String,
        /// Replacement text.
        new_text: String,
    },
    /// `delete_message`.
    DeleteMessage {
        /// Message to delete.
        message_id: String,
    },
    /// `get_messages`.
    GetMessages {
        /// Maximum messages to return.
        limit: usize,
    },
    /// `get_user_info`.
    GetUserInfo {
        /// User to look up.
        user_id: String,
    },
    /// `set_webhook`.
    SetWebhook {
        /// Webhook registration.
        config: WebhookConfig,
    },
    /// `post`.
    Post {
        /// Status text.
        text: String,
        /// Attachments.
        media: Vec<Media>,
    },
    /// An inbound event on its way to the bus.
    Event {
        /// The event.
        event: Box<Event>,
    },
}

impl Payload {
    /// Operation name used in logs and errors.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::SendMedia { .. } => "send_media",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::GetMessages { .. } => "get_messages",
            Self::GetUserInfo { .. } => "get_user_info",
            Self::SetWebhook { .. } => "set_webhook",
            Self::Post { .. } => "post",
            Self::Event { .. } => "event",
        }
    }
}

/// Mutable state threaded through one pipeline execution.
#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    /// Platform tag.
    pub platform: String,
    /// Call direction.
    pub direction: Direction,
    /// Target chat, when the operation has one.
    pub chat_id: Option<String>,
    /// Operation arguments.
    pub payload: Payload,
    /// Free-form annotations units can share with each other.
    pub metadata: RawMap,
}

impl CallContext {
    /// Context for an outbound call.
    pub fn outbound(platform: impl Into<String>, chat_id: Option<String>, payload: Payload) -> Self {
        Self {
            platform: platform.into(),
            direction: Direction::Outbound,
            chat_id,
            payload,
            metadata: RawMap::new(),
        }
    }

    /// Context for an inbound event. The chat id is taken from the event.
    pub fn inbound(platform: impl Into<String>, event: Event) -> Self {
        Self {
            platform: platform.into(),
            direction: Direction::Inbound,
            chat_id: event.chat_id.clone(),
            payload: Payload::Event {
                event: Box::new(event),
            },
            metadata: RawMap::new(),
        }
    }

    /// Operation name.
    pub fn operation(&self) -> &'static str {
        self.payload.operation()
    }
}

/// Result of a pipeline execution.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// A message was sent, edited or posted.
    Sent(MessageResponse),
    /// Delete result.
    Deleted(bool),
    /// Fetched history, most recent first.
    Messages(Vec<Message>),
    /// User lookup result.
    User(UserInfo),
    /// Webhook registration result.
    WebhookSet(bool),
    /// An inbound event was emitted.
    Emitted(EmitReport),
    /// A unit dropped the call without producing a result.
    Skipped,
}

impl CallOutcome {
    fn variant(&self) -> &'static str {
        match self {
            Self::Sent(_) => "sent",
            Self::Deleted(_) => "deleted",
            Self::Messages(_) => "messages",
            Self::User(_) => "user",
            Self::WebhookSet(_) => "webhook_set",
            Self::Emitted(_) => "emitted",
            Self::Skipped => "skipped",
        }
    }

    fn mismatch(&self, platform: &str, expected: &str) -> ConnectorError {
        ConnectorError::message(
            platform,
            format!("middleware returned '{}' where '{expected}' was expected", self.variant()),
        )
    }

    /// Extract a [`MessageResponse`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Message`] for any other outcome.
    pub fn into_sent(self, platform: &str) -> Result<MessageResponse, ConnectorError> {
        match self {
            Self::Sent(response) => Ok(response),
            other => Err(other.mismatch(platform, "sent")),
        }
    }

    /// Extract a delete result.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Message`] for any other outcome.
    pub fn into_deleted(self, platform: &str) -> Result<bool, ConnectorError> {
        match self {
            Self::Deleted(deleted) => Ok(deleted),
            other => Err(other.mismatch(platform, "deleted")),
        }
    }

    /// Extract fetched messages.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Message`] for any other outcome.
    pub fn into_messages(self, platform: &str) -> Result<Vec<Message>, ConnectorError> {
        match self {
            Self::Messages(messages) => Ok(messages),
            other => Err(other.mismatch(platform, "messages")),
        }
    }

    /// Extract a user.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Message`] for any other outcome.
    pub fn into_user(self, platform: &str) -> Result<UserInfo, ConnectorError> {
        match self {
            Self::User(user) => Ok(user),
            other => Err(other.mismatch(platform, "user")),
        }
    }

    /// Extract a webhook registration result.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Message`] for any other outcome.
    pub fn into_webhook_set(self, platform: &str) -> Result<bool, ConnectorError> {
        match self {
            Self::WebhookSet(set) => Ok(set),
            other => Err(other.mismatch(platform, "webhook_set")),
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One layer of the onion.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs and [`Pipeline::names`].
    fn name(&self) -> &str;

    /// Handle the call. Call `next.run(ctx)` to continue inward.
    ///
    /// # Errors
    ///
    /// Units may raise their own [`ConnectorError`] or propagate, convert or
    /// replace the error returned by `next`. They must not swallow an error
    /// into a success outcome the caller cannot distinguish.
    async fn handle(
        &self,
        ctx: &mut CallContext,
        next: Next<'_>,
    ) -> Result<CallOutcome, ConnectorError>;
}

/// The innermost call: the adapter operation, or the bus emit.
#[async_trait]
pub trait Terminal: Send + Sync {
    /// Perform the call described by `ctx`.
    ///
    /// # Errors
    ///
    /// Whatever the wrapped operation returns.
    async fn call(&self, ctx: &mut CallContext) -> Result<CallOutcome, ConnectorError>;
}

/// Continuation handed to each unit: the remaining units plus the terminal.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    /// Continue with the next inner unit, or the terminal.
    ///
    /// May be called more than once (e.g. by a retry unit).
    ///
    /// # Errors
    ///
    /// Whatever the inner units or the terminal return.
    pub async fn run(self, ctx: &mut CallContext) -> Result<CallOutcome, ConnectorError> {
        match self.rest.split_first() {
            Some((unit, rest)) => {
                unit.handle(
                    ctx,
                    Next {
                        rest,
                        terminal: self.terminal,
                    },
                )
                .await
            }
            None => self.terminal.call(ctx).await,
        }
    }

    /// Units still to run.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Ordered list of middleware units. Cheap to clone.
#[derive(Clone, Default)]
pub struct Pipeline {
    units: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Pipeline {
    /// An empty pipeline: calls go straight to the terminal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `unit` as the new innermost layer.
    pub fn add(&mut self, unit: impl Middleware + 'static) -> &mut Self {
        self.units.push(Arc::new(unit));
        self
    }

    /// Append an already shared unit.
    pub fn add_shared(&mut self, unit: Arc<dyn Middleware>) -> &mut Self {
        self.units.push(unit);
        self
    }

    /// Builder form of [`Pipeline::add`].
    #[must_use]
    pub fn with(mut self, unit: impl Middleware + 'static) -> Self {
        self.add(unit);
        self
    }

    /// Unit names, outermost first.
    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(|unit| unit.name()).collect()
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether there are no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Run `ctx` through every unit and then `terminal`.
    ///
    /// # Errors
    ///
    /// Whatever the units or the terminal return.
    pub async fn execute(
        &self,
        ctx: &mut CallContext,
        terminal: &dyn Terminal,
    ) -> Result<CallOutcome, ConnectorError> {
        Next {
            rest: &self.units,
            terminal,
        }
        .run(ctx)
        .await
    }
}
