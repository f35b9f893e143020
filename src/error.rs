//! Error taxonomy shared by the core and every adapter.
//!
//! Adapters translate transport and protocol failures into exactly one
//! [`ConnectorError`] variant before returning. The core never re-wraps an
//! error that is already typed; middleware may convert but must not swallow.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Structured detail attached to every error.
pub type ErrorDetails = BTreeMap<String, serde_json::Value>;

/// Platform tag used for errors raised by the core itself.
pub const CORE_PLATFORM: &str = "core";

/// Retry delay reported when a platform throttles without saying for how long.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Discriminant of a [`ConnectorError`], convenient for matching and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid or expired credentials.
    Authentication,
    /// A limiter or platform threshold was hit.
    RateLimit,
    /// Registry lookup miss.
    ProviderNotFound,
    /// Send, edit, or delete failed, or the operation is unsupported.
    Message,
    /// Webhook registration or verification failed.
    Webhook,
    /// Media upload or download failed.
    Media,
    /// Invalid or missing adapter configuration.
    Configuration,
    /// Call rejected because the circuit breaker is open.
    CircuitOpen,
    /// Adapter not connected, or the transport failed before a response.
    Connection,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::ProviderNotFound => "provider_not_found",
            Self::Message => "message",
            Self::Webhook => "webhook",
            Self::Media => "media",
            Self::Configuration => "configuration",
            Self::CircuitOpen => "circuit_open",
            Self::Connection => "connection",
        };
        f.write_str(name)
    }
}

/// Every failure surfaced by the connector.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    /// Invalid or expired credentials.
    #[error("{platform}: authentication failed: {message}")]
    Authentication {
        /// Originating platform.
        platform: String,
        /// Human-readable description.
        message: String,
        /// Structured detail.
        details: ErrorDetails,
    },

    /// A limiter or platform threshold was hit.
    #[error("{platform}: rate limited (retry after {retry_after:?}): {message}")]
    RateLimit {
        /// Originating platform.
        platform: String,
        /// Human-readable description.
        message: String,
        /// Recommended delay before the next attempt.
        retry_after: Duration,
        /// Structured detail.
        details: ErrorDetails,
    },

    /// The requested provider is not registered.
    #[error("provider '{name}' not found (known: {})", .known.join(", "))]
    ProviderNotFound {
        /// Name that was looked up.
        name: String,
        /// Names registered at lookup time.
        known: Vec<String>,
        /// Structured detail.
        details: ErrorDetails,
    },

    /// Send, edit, or delete failed, or the operation is unsupported.
    #[error("{platform}: message operation failed: {message}")]
    Message {
        /// Originating platform.
        platform: String,
        /// Human-readable description.
        message: String,
        /// Structured detail.
        details: ErrorDetails,
    },

    /// Webhook registration or verification failed.
    #[error("{platform}: webhook error: {message}")]
    Webhook {
        /// Originating platform.
        platform: String,
        /// Human-readable description.
        message: String,
        /// Structured detail.
        details: ErrorDetails,
    },

    /// Media upload or download failed.
    #[error("{platform}: media error: {message}")]
    Media {
        /// Originating platform.
        platform: String,
        /// Human-readable description.
        message: String,
        /// Structured detail.
        details: ErrorDetails,
    },

    /// Invalid or missing adapter configuration.
    #[error("{platform}: configuration error: {message}")]
    Configuration {
        /// Originating platform.
        platform: String,
        /// Human-readable description.
        message: String,
        /// Structured detail.
        details: ErrorDetails,
    },

    /// Call rejected because the circuit breaker is open.
    #[error("{platform}: circuit open (retry after {retry_after:?})")]
    CircuitOpen {
        /// Originating platform.
        platform: String,
        /// Time left until the breaker admits a trial call.
        retry_after: Duration,
        /// Structured detail.
        details: ErrorDetails,
    },

    /// Adapter not connected, or the transport failed before a response.
    #[error("{platform}: connection error: {message}")]
    Connection {
        /// Originating platform.
        platform: String,
        /// Human-readable description.
        message: String,
        /// Structured detail.
        details: ErrorDetails,
    },
}

impl ConnectorError {
    /// Build an authentication error.
    pub fn authentication(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            platform: platform.into(),
            message: message.into(),
            details: ErrorDetails::new(),
        }
    }

    /// Build a rate-limit error carrying the recommended retry delay.
    pub fn rate_limit(
        platform: impl Into<String>,
        message: impl Into<String>,
        retry_after: Duration,
    ) -> Self {
        Self::RateLimit {
            platform: platform.into(),
            message: message.into(),
            retry_after,
            details: ErrorDetails::new(),
        }
    }

    /// Build a provider-not-found error listing the known names.
    pub fn provider_not_found(name: impl Into<String>, known: Vec<String>) -> Self {
        Self::ProviderNotFound {
            name: name.into(),
            known,
            details: ErrorDetails::new(),
        }
    }

    /// Build a message-operation error.
    pub fn message(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Message {
            platform: platform.into(),
            message: message.into(),
            details: ErrorDetails::new(),
        }
    }

    /// Build a webhook error.
    pub fn webhook(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Webhook {
            platform: platform.into(),
            message: message.into(),
            details: ErrorDetails::new(),
        }
    }

    /// Build a media error.
    pub fn media(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Media {
            platform: platform.into(),
            message: message.into(),
            details: ErrorDetails::new(),
        }
    }

    /// Build a configuration error.
    pub fn configuration(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            platform: platform.into(),
            message: message.into(),
            details: ErrorDetails::new(),
        }
    }

    /// Build a circuit-open error.
    pub fn circuit_open(platform: impl Into<String>, retry_after: Duration) -> Self {
        Self::CircuitOpen {
            platform: platform.into(),
            retry_after,
            details: ErrorDetails::new(),
        }
    }

    /// Build a connection error.
    pub fn connection(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            platform: platform.into(),
            message: message.into(),
            details: ErrorDetails::new(),
        }
    }

    /// The adapter was called before `connect()` succeeded.
    pub fn not_connected(platform: impl Into<String>) -> Self {
        Self::connection(platform, "adapter is not connected; call connect() first")
            .with_detail("state", "disconnected")
    }

    /// The platform has no API for `operation`.
    pub fn unsupported(platform: impl Into<String>, operation: &str) -> Self {
        Self::message(platform, format!("{operation} is not supported by this platform"))
            .with_detail("operation", operation)
            .with_detail("unsupported", true)
    }

    /// Build an error of the given kind with a generic message.
    ///
    /// Rate-limit and circuit-open kinds use [`DEFAULT_RETRY_AFTER`]; the
    /// provider-not-found kind treats `message` as the missing name.
    pub fn from_kind(kind: ErrorKind, platform: impl Into<String>, message: impl Into<String>) -> Self {
        let platform = platform.into();
        let message = message.into();
        match kind {
            ErrorKind::Authentication => Self::authentication(platform, message),
            ErrorKind::RateLimit => Self::rate_limit(platform, message, DEFAULT_RETRY_AFTER),
            ErrorKind::ProviderNotFound => Self::provider_not_found(message, Vec::new()),
            ErrorKind::Message => Self::message(platform, message),
            ErrorKind::Webhook => Self::webhook(platform, message),
            ErrorKind::Media => Self::media(platform, message),
            ErrorKind::Configuration => Self::configuration(platform, message),
            ErrorKind::CircuitOpen => Self::circuit_open(platform, DEFAULT_RETRY_AFTER),
            ErrorKind::Connection => Self::connection(platform, message),
        }
    }

    /// Attach a detail entry, replacing any previous value under `key`.
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details_mut().insert(key.to_owned(), value.into());
        self
    }

    /// The error's kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::ProviderNotFound { .. } => ErrorKind::ProviderNotFound,
            Self::Message { .. } => ErrorKind::Message,
            Self::Webhook { .. } => ErrorKind::Webhook,
            Self::Media { .. } => ErrorKind::Media,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Connection { .. } => ErrorKind::Connection,
        }
    }

    /// The platform the error originated from (`"core"` for registry misses).
    pub fn platform(&self) -> &str {
        match self {
            Self::ProviderNotFound { .. } => CORE_PLATFORM,
            Self::Authentication { platform, .. }
            | Self::RateLimit { platform, .. }
            | Self::Message { platform, .. }
            | Self::Webhook { platform, .. }
            | Self::Media { platform, .. }
            | Self::Configuration { platform, .. }
            | Self::CircuitOpen { platform, .. }
            | Self::Connection { platform, .. } => platform,
        }
    }

    /// Structured detail map.
    pub fn details(&self) -> &ErrorDetails {
        match self {
            Self::Authentication { details, .. }
            | Self::RateLimit { details, .. }
            | Self::ProviderNotFound { details, .. }
            | Self::Message { details, .. }
            | Self::Webhook { details, .. }
            | Self::Media { details, .. }
            | Self::Configuration { details, .. }
            | Self::CircuitOpen { details, .. }
            | Self::Connection { details, .. } => details,
        }
    }

    fn details_mut(&mut self) -> &mut ErrorDetails {
        match self {
            Self::Authentication { details, .. }
            | Self::RateLimit { details, .. }
            | Self::ProviderNotFound { details, .. }
            | Self::Message { details, .. }
            | Self::Webhook { details, .. }
            | Self::Media { details, .. }
            | Self::Configuration { details, .. }
            | Self::CircuitOpen { details, .. }
            | Self::Connection { details, .. } => details,
        }
    }

    /// Recommended delay before retrying, for rate-limit and circuit-open errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } | Self::CircuitOpen { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// Whether this is the "call connect() first" precondition failure.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::Connection { details, .. }
            if details.get("state").and_then(serde_json::Value::as_str) == Some("disconnected"))
    }

    /// Whether a retry policy may re-attempt the call.
    ///
    /// Only transient conditions qualify: throttling and transport failures.
    /// Calling a disconnected adapter is a caller bug and never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::RateLimit | ErrorKind::Connection)
            && !self.is_not_connected()
    }

    /// Whether this outcome should count as a failure for a circuit breaker.
    ///
    /// Errors produced before reaching the provider (bad configuration,
    /// unknown provider, an already-open breaker) say nothing about the
    /// provider's health.
    pub fn counts_against_breaker(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::ProviderNotFound | ErrorKind::CircuitOpen
        ) && !self.is_not_connected()
    }
}
