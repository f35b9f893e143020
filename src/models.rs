//! Normalized value types exchanged between callers, the core, and adapters.
//!
//! Every adapter maps its platform's wire objects into these types; nothing
//! platform-native crosses the adapter boundary except the opaque `raw` maps.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque platform-specific fields carried alongside a normalized value.
pub type RawMap = BTreeMap<String, serde_json::Value>;

/// Default per-request timeout for adapters.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries an adapter's retry policy may attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// `Media::raw` key holding a platform file id, for re-sending media the
/// platform already stores.
pub const FILE_ID_KEY: &str = "file_id";

// ---------------------------------------------------------------------------
// AdapterConfig
// ---------------------------------------------------------------------------

/// Fully resolved configuration for one adapter instance.
///
/// Immutable after construction: the `with_*` builders consume `self`, and
/// only getters are exposed afterwards. Credential values never appear in
/// `Debug` output.
#[derive(Clone, PartialEq)]
pub struct AdapterConfig {
    provider: String,
    credentials: BTreeMap<String, String>,
    base_url: Option<String>,
    timeout: Duration,
    max_retries: u32,
    rate_limit: Option<f64>,
    extra: RawMap,
}

impl fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("provider", &self.provider)
            .field("credentials", &self.credentials.keys().collect::<Vec<_>>())
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("rate_limit", &self.rate_limit)
            .field("extra", &self.extra)
            .finish()
    }
}

impl AdapterConfig {
    /// Start a configuration for `provider` with default timeout and retries.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            credentials: BTreeMap::new(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            rate_limit: None,
            extra: RawMap::new(),
        }
    }

    /// Add a credential value.
    #[must_use]
    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    /// Override the platform API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum retry count.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Give this adapter its own rate limit, in requests per second.
    #[must_use]
    pub fn with_rate_limit(mut self, per_second: f64) -> Self {
        self.rate_limit = Some(per_second);
        self
    }

    /// Add a provider-specific extension field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Provider name this configuration targets.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Credential value for `key`, if present.
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(String::as_str)
    }

    /// Names of all configured credentials.
    pub fn credential_keys(&self) -> impl Iterator<Item = &str> {
        self.credentials.keys().map(String::as_str)
    }

    /// Credential values, for redaction.
    pub fn secret_values(&self) -> Vec<String> {
        self.credentials
            .values()
            .filter(|value| !value.trim().is_empty())
            .cloned()
            .collect()
    }

    /// Base URL override.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Maximum retry count.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Per-adapter rate limit in requests per second, if any.
    pub fn rate_limit(&self) -> Option<f64> {
        self.rate_limit
    }

    /// Provider-specific extension field.
    pub fn extra(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    /// All provider-specific extension fields.
    pub fn extras(&self) -> &RawMap {
        &self.extra
    }
}

// ---------------------------------------------------------------------------
// Users and media
// ---------------------------------------------------------------------------

/// A platform user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Platform-assigned user identifier.
    pub id: String,
    /// Platform tag.
    pub platform: String,
    /// Handle, if the platform has one.
    pub username: Option<String>,
    /// Human-readable name.
    pub display_name: Option<String>,
    /// Profile picture URL.
    pub avatar_url: Option<String>,
    /// Whether the account is automated.
    #[serde(default)]
    pub is_bot: bool,
    /// Platform-specific fields.
    #[serde(default)]
    pub raw: RawMap,
}

impl UserInfo {
    /// A user known only by id.
    pub fn new(id: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            platform: platform.into(),
            username: None,
            display_name: None,
            avatar_url: None,
            is_bot: false,
            raw: RawMap::new(),
        }
    }
}

/// Kind of media attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Still image.
    Image,
    /// Video clip.
    Video,
    /// Audio track.
    Audio,
    /// Arbitrary file.
    Document,
    /// Sticker.
    Sticker,
    /// Voice note.
    Voice,
    /// Animated GIF or silent video.
    Animation,
}

/// Where a media attachment's content comes from.
///
/// An enum rather than optional fields, so at most one source can ever be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MediaSource {
    /// Remote URL the platform fetches.
    Url(String),
    /// Inline content, uploaded by the adapter.
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    /// Reference only (e.g. an inbound attachment identified in `raw`).
    None,
}

/// A media attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    /// Attachment kind.
    pub kind: MediaKind,
    /// Content source.
    pub source: MediaSource,
    /// Upload file name.
    pub file_name: Option<String>,
    /// MIME type.
    pub mime_type: Option<String>,
    /// Size in bytes, when known.
    pub size_bytes: Option<u64>,
    /// Platform-specific fields (e.g. a platform file id).
    #[serde(default)]
    pub raw: RawMap,
}

impl Media {
    /// Media fetched by the platform from a URL.
    pub fn from_url(kind: MediaKind, url: impl Into<String>) -> Self {
        Self::with_source(kind, MediaSource::Url(url.into()))
    }

    /// Media uploaded from inline bytes.
    pub fn from_bytes(kind: MediaKind, bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        let size = u64::try_from(bytes.len()).ok();
        let mut media = Self::with_source(kind, MediaSource::Bytes(bytes));
        media.file_name = Some(file_name.into());
        media.size_bytes = size;
        media
    }

    /// Media with no content, identified by its `raw` fields.
    pub fn reference(kind: MediaKind) -> Self {
        Self::with_source(kind, MediaSource::None)
    }

    fn with_source(kind: MediaKind, source: MediaSource) -> Self {
        Self {
            kind,
            source,
            file_name: None,
            mime_type: None,
            size_bytes: None,
            raw: RawMap::new(),
        }
    }

    /// Set the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// The URL, if the content is remote.
    pub fn url(&self) -> Option<&str> {
        match &self.source {
            MediaSource::Url(url) => Some(url),
            _ => None,
        }
    }

    /// The bytes, if the content is inline.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.source {
            MediaSource::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A normalized message from any platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Platform-assigned message id.
    pub id: String,
    /// Platform tag.
    pub platform: String,
    /// Chat, channel, or recipient identifier.
    pub chat_id: String,
    /// Author.
    pub sender: UserInfo,
    /// Text body, if any.
    pub text: Option<String>,
    /// Attachments in platform order.
    #[serde(default)]
    pub media: Vec<Media>,
    /// Id of the message this one replies to.
    pub reply_to_id: Option<String>,
    /// When the message was sent.
    pub timestamp: DateTime<Utc>,
    /// Platform-specific fields.
    #[serde(default)]
    pub raw: RawMap,
}

/// Result of a send, edit, or post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Whether the platform accepted the operation.
    pub success: bool,
    /// Id assigned by the platform, if any.
    pub message_id: Option<String>,
    /// Platform tag.
    pub platform: String,
    /// When the platform acknowledged the operation.
    pub timestamp: DateTime<Utc>,
    /// Platform-specific fields.
    #[serde(default)]
    pub raw: RawMap,
}

impl MessageResponse {
    /// A successful response carrying the platform-assigned id.
    pub fn sent(platform: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            platform: platform.into(),
            timestamp: Utc::now(),
            raw: RawMap::new(),
        }
    }

    /// Attach a platform-specific field.
    #[must_use]
    pub fn with_raw(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.raw.insert(key.into(), value.into());
        self
    }
}

/// Webhook registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Public URL the platform will call.
    pub url: String,
    /// Shared secret for payload verification.
    pub secret: Option<String>,
    /// Event names to subscribe to; `"*"` means all.
    #[serde(default = "default_webhook_events")]
    pub events: Vec<String>,
}

fn default_webhook_events() -> Vec<String> {
    vec!["*".to_owned()]
}

impl WebhookConfig {
    /// Subscribe `url` to all events without a secret.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: None,
            events: default_webhook_events(),
        }
    }

    /// Whether every event type is requested.
    pub fn wants_all_events(&self) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == "*")
    }
}

/// Point-in-time provider health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Provider tag.
    pub provider: String,
    /// Whether the provider answered correctly.
    pub healthy: bool,
    /// Round-trip latency of the check in milliseconds.
    pub latency_ms: Option<u64>,
    /// Failure description when unhealthy.
    pub error: Option<String>,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    /// A healthy snapshot.
    pub fn healthy(provider: impl Into<String>, latency: Duration) -> Self {
        Self {
            provider: provider.into(),
            healthy: true,
            latency_ms: Some(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)),
            error: None,
            checked_at: Utc::now(),
        }
    }

    /// An unhealthy snapshot.
    pub fn unhealthy(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            healthy: false,
            latency_ms: None,
            error: Some(error.into()),
            checked_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Closed set of inbound event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new message arrived.
    MessageReceived,
    /// A message was edited.
    MessageEdited,
    /// A message was deleted.
    MessageDeleted,
    /// A reaction was added to a message.
    ReactionAdded,
    /// A reaction was removed from a message.
    ReactionRemoved,
    /// A user joined a chat.
    UserJoined,
    /// A user left a chat.
    UserLeft,
    /// A user is typing.
    Typing,
    /// Platform-specific event, described in `raw`.
    Custom,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::MessageReceived,
        Self::MessageEdited,
        Self::MessageDeleted,
        Self::ReactionAdded,
        Self::ReactionRemoved,
        Self::UserJoined,
        Self::UserLeft,
        Self::Typing,
        Self::Custom,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageReceived => "message_received",
            Self::MessageEdited => "message_edited",
            Self::MessageDeleted => "message_deleted",
            Self::ReactionAdded => "reaction_added",
            Self::ReactionRemoved => "reaction_removed",
            Self::UserJoined => "user_joined",
            Self::UserLeft => "user_left",
            Self::Typing => "typing",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized inbound occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id assigned when the event was normalized.
    pub id: Uuid,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Platform tag.
    pub platform: String,
    /// Chat the event happened in.
    pub chat_id: Option<String>,
    /// User who caused the event.
    pub user: Option<UserInfo>,
    /// Message the event concerns.
    pub message: Option<Message>,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Platform-specific fields.
    #[serde(default)]
    pub raw: RawMap,
}

impl Event {
    /// A bare event of `event_type` on `platform`, timestamped now.
    pub fn new(event_type: EventType, platform: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            platform: platform.into(),
            chat_id: None,
            user: None,
            message: None,
            timestamp: Utc::now(),
            raw: RawMap::new(),
        }
    }

    /// An event about `message`, inheriting its platform, chat, sender and time.
    pub fn for_message(event_type: EventType, message: Message) -> Self {
        let mut event = Self::new(event_type, message.platform.clone());
        event.chat_id = Some(message.chat_id.clone());
        event.user = Some(message.sender.clone());
        event.timestamp = message.timestamp;
        event.message = Some(message);
        event
    }

    /// Set the chat id.
    #[must_use]
    pub fn with_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    /// Set the acting user.
    #[must_use]
    pub fn with_user(mut self, user: UserInfo) -> Self {
        self.user = Some(user);
        self
    }

    /// Attach a platform-specific field.
    #[must_use]
    pub fn with_raw(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.raw.insert(key.into(), value.into());
        self
    }
}
