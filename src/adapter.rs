//! The capability contract every platform adapter implements, plus the
//! shared lifecycle state machine and the infrastructure handed to adapters
//! at construction.
//!
//! Lifecycle: `Disconnected -> Connected -> (Polling <-> Connected) ->
//! Disconnected`. A failed `connect` leaves the adapter disconnected.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::ConnectorError;
use crate::events::EventEmitter;
use crate::models::{
    AdapterConfig, HealthStatus, Media, Message, MessageResponse, UserInfo, WebhookConfig,
};
use crate::resilience::ResilienceGate;
use crate::transport::HttpTransport;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Adapter connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    /// Not connected; I/O operations fail.
    Disconnected,
    /// Connected and ready for calls.
    Connected,
    /// Connected and pulling inbound events.
    Polling,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Polling => "polling",
        };
        f.write_str(name)
    }
}

/// Thread-safe lifecycle cell adapters embed to track [`AdapterState`].
#[derive(Debug)]
pub struct Lifecycle {
    platform: String,
    state: Mutex<AdapterState>,
}

impl Lifecycle {
    /// A disconnected lifecycle for `platform`.
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            state: Mutex::new(AdapterState::Disconnected),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> AdapterState {
        *self.lock()
    }

    /// Whether connected (polling counts as connected).
    pub fn is_connected(&self) -> bool {
        self.state() != AdapterState::Disconnected
    }

    /// Fail unless connected.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Connection`] while disconnected.
    pub fn ensure_connected(&self) -> Result<(), ConnectorError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConnectorError::not_connected(&self.platform))
        }
    }

    /// Record a successful connect. Returns `false` if already connected, so
    /// adapters can make `connect` idempotent.
    pub fn mark_connected(&self) -> bool {
        let mut state = self.lock();
        if *state == AdapterState::Disconnected {
            *state = AdapterState::Connected;
            debug!(platform = %self.platform, "adapter connected");
            true
        } else {
            false
        }
    }

    /// Move to disconnected from any state. Returns the previous state.
    pub fn mark_disconnected(&self) -> AdapterState {
        let mut state = self.lock();
        let previous = *state;
        *state = AdapterState::Disconnected;
        if previous != AdapterState::Disconnected {
            debug!(platform = %self.platform, "adapter disconnected");
        }
        previous
    }

    /// Move from connected to polling. Returns `false` if already polling.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Connection`] while disconnected.
    pub fn begin_polling(&self) -> Result<bool, ConnectorError> {
        let mut state = self.lock();
        match *state {
            AdapterState::Disconnected => Err(ConnectorError::not_connected(&self.platform)),
            AdapterState::Polling => Ok(false),
            AdapterState::Connected => {
                *state = AdapterState::Polling;
                Ok(true)
            }
        }
    }

    /// Move from polling back to connected. Returns `false` if not polling.
    pub fn end_polling(&self) -> bool {
        let mut state = self.lock();
        if *state == AdapterState::Polling {
            *state = AdapterState::Connected;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// One messaging platform behind a uniform interface.
///
/// Implementations must translate every platform-native failure into a
/// [`ConnectorError`] and return only core models. `connect` is idempotent,
/// I/O before `connect` fails with [`ConnectorError::Connection`], and an
/// operation the platform lacks fails with [`ConnectorError::Message`] via
/// [`ConnectorError::unsupported`].
#[async_trait]
pub trait Adapter: fmt::Debug + Send + Sync {
    /// Platform tag (e.g. `"telegram"`).
    fn platform(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> AdapterState;

    /// Establish the session and verify credentials.
    ///
    /// # Errors
    ///
    /// Authentication, connection or configuration errors; the adapter stays
    /// disconnected.
    async fn connect(&self) -> Result<(), ConnectorError>;

    /// Tear down the session, stopping polling first.
    ///
    /// # Errors
    ///
    /// Connection errors from the platform; the adapter is disconnected
    /// regardless.
    async fn disconnect(&self) -> Result<(), ConnectorError>;

    /// Check that the platform is reachable. Never fails; problems are reported in the status.
    async fn health_check(&self) -> HealthStatus;

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] kind.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<MessageResponse, ConnectorError>;

    /// Send one media attachment.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] kind; upload failures use the media kind.
    async fn send_media(
        &self,
        chat_id: &str,
        media: &Media,
        caption: Option<&str>,
    ) -> Result<MessageResponse, ConnectorError>;

    /// Replace a message's text.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] kind.
    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        new_text: &str,
    ) -> Result<MessageResponse, ConnectorError>;

    /// Delete a message. Returns whether the platform deleted it.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] kind.
    async fn delete_message(&self, chat_id: &str, message_id: &str)
        -> Result<bool, ConnectorError>;

    /// Fetch up to `limit` messages, most recent first.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] kind.
    async fn get_messages(&self, chat_id: &str, limit: usize)
        -> Result<Vec<Message>, ConnectorError>;

    /// Look up a user.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] kind.
    async fn get_user_info(&self, user_id: &str) -> Result<UserInfo, ConnectorError>;

    /// Register a webhook. Returns whether the platform accepted it.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::Webhook`] on rejection, or other kinds.
    async fn set_webhook(&self, config: &WebhookConfig) -> Result<bool, ConnectorError>;

    /// Start pulling inbound events into the event emitter.
    ///
    /// # Errors
    ///
    /// Connection errors, or the unsupported message error for push-only
    /// platforms.
    async fn start_polling(&self) -> Result<(), ConnectorError>;

    /// Stop pulling inbound events. A no-op when not polling.
    ///
    /// # Errors
    ///
    /// Connection errors from the platform.
    async fn stop_polling(&self) -> Result<(), ConnectorError>;

    /// Publish a public status update. Most chat platforms have no such
    /// concept; the default reports it as unsupported.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::Message`] when unsupported, or other kinds.
    async fn post(&self, text: &str, media: &[Media]) -> Result<MessageResponse, ConnectorError> {
        let _ = (text, media);
        Err(ConnectorError::unsupported(self.platform(), "post"))
    }
}

// ---------------------------------------------------------------------------
// Construction context
// ---------------------------------------------------------------------------

/// Everything the factory injects into a new adapter.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    /// Validated configuration.
    pub config: AdapterConfig,
    /// Shared HTTP client.
    pub http: HttpTransport,
    /// Rate limiter and circuit breaker for outbound calls.
    pub gate: ResilienceGate,
    /// Hook for inbound events.
    pub events: EventEmitter,
    /// Span adapters enter for their own logging.
    pub span: tracing::Span,
}
