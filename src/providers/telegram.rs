//! Telegram Bot API adapter.
//!
//! Outbound calls go through the resilience gate to the Bot API over the
//! shared HTTP transport. Inbound updates are pulled with `getUpdates` long
//! polling in a background task and pushed through the event emitter.
//!
//! Credentials: `bot_token`. Extras: `poll_timeout_secs` (default 30).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::adapter::{Adapter, AdapterContext, AdapterState, Lifecycle};
use crate::error::{ConnectorError, ErrorKind, DEFAULT_RETRY_AFTER};
use crate::events::EventEmitter;
use crate::models::{
    Event, EventType, HealthStatus, Media, MediaKind, MediaSource, Message, MessageResponse,
    RawMap, UserInfo, WebhookConfig, FILE_ID_KEY,
};
use crate::registry::ProviderDescriptor;
use crate::resilience::{CircuitBreaker, ResilienceGate};
use crate::transport::{check_response, sanitize_error_body, transport_error, HttpTransport};

/// Provider name.
pub const PLATFORM: &str = "telegram";

/// Credential key holding the bot token.
pub const BOT_TOKEN: &str = "bot_token";

/// Base URL for the Telegram Bot API.
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Default long-poll timeout for `getUpdates`, in seconds.
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

/// Initial backoff on poll failure, in milliseconds.
const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Maximum backoff on poll failure, in milliseconds.
const MAX_BACKOFF_MS: u64 = 30_000;

/// Extra seconds added to the HTTP timeout beyond the long-poll timeout,
/// so the socket stays open while Telegram holds the request.
const POLL_TIMEOUT_MARGIN_SECS: u64 = 10;

/// Registry entry for the Telegram provider.
pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor::new(PLATFORM, |ctx| {
        TelegramAdapter::new(ctx).map(|adapter| Arc::new(adapter) as Arc<dyn Adapter>)
    })
    .requires(&[BOT_TOKEN])
}

// ---------------------------------------------------------------------------
// Telegram API types (subset)
// ---------------------------------------------------------------------------

/// Generic Telegram Bot API response wrapper.
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Telegram `Update` object.
#[derive(Debug, Default, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessage>,
    edited_message: Option<TelegramMessage>,
    channel_post: Option<TelegramMessage>,
    message_reaction: Option<TelegramReaction>,
}

/// Telegram `Message` object (subset of fields we use).
#[derive(Debug, Clone, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    from: Option<TelegramUser>,
    chat: TelegramChat,
    date: i64,
    text: Option<String>,
    caption: Option<String>,
    reply_to_message: Option<Box<TelegramMessage>>,
    photo: Option<Vec<TelegramFile>>,
    video: Option<TelegramFile>,
    audio: Option<TelegramFile>,
    voice: Option<TelegramFile>,
    document: Option<TelegramFile>,
    sticker: Option<TelegramFile>,
    animation: Option<TelegramFile>,
    new_chat_members: Option<Vec<TelegramUser>>,
    left_chat_member: Option<TelegramUser>,
}

/// Telegram `User` object.
#[derive(Debug, Clone, Deserialize)]
struct TelegramUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
}

/// Telegram `Chat` object.
#[derive(Debug, Clone, Deserialize)]
struct TelegramChat {
    id: i64,
    #[serde(rename = "type")]
    chat_type: String,
    title: Option<String>,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

/// Any file-like attachment (`PhotoSize`, `Video`, `Document`, ...).
#[derive(Debug, Clone, Deserialize)]
struct TelegramFile {
    file_id: String,
    file_name: Option<String>,
    mime_type: Option<String>,
    file_size: Option<u64>,
}

/// Telegram `MessageReactionUpdated` object.
#[derive(Debug, Clone, Deserialize)]
struct TelegramReaction {
    chat: TelegramChat,
    message_id: i64,
    user: Option<TelegramUser>,
    date: i64,
    #[serde(default)]
    old_reaction: Vec<Value>,
    #[serde(default)]
    new_reaction: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Telegram Bot API adapter.
#[derive(Debug)]
pub struct TelegramAdapter {
    lifecycle: Lifecycle,
    api_base: String,
    bot_token: String,
    poll_timeout_secs: u64,
    http: HttpTransport,
    gate: ResilienceGate,
    events: EventEmitter,
    span: tracing::Span,
    me: Mutex<Option<UserInfo>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramAdapter {
    /// Build from the factory context.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] when `bot_token` is missing.
    pub fn new(ctx: AdapterContext) -> Result<Self, ConnectorError> {
        let bot_token = ctx
            .config
            .credential(BOT_TOKEN)
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                ConnectorError::configuration(PLATFORM, "missing credential 'bot_token'")
                    .with_detail("missing", vec![BOT_TOKEN])
            })?
            .to_owned();
        let api_base = ctx
            .config
            .base_url()
            .unwrap_or(TELEGRAM_API_BASE)
            .trim_end_matches('/')
            .to_owned();
        let poll_timeout_secs = ctx
            .config
            .extra("poll_timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_POLL_TIMEOUT_SECS);

        Ok(Self {
            lifecycle: Lifecycle::new(PLATFORM),
            api_base,
            bot_token,
            poll_timeout_secs,
            http: ctx.http,
            gate: ctx.gate,
            events: ctx.events,
            span: ctx.span,
            me: Mutex::new(None),
            poller: Mutex::new(None),
        })
    }

    /// The bot's own account, known after `connect`.
    pub fn me(&self) -> Option<UserInfo> {
        lock(&self.me).clone()
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    /// POST a JSON body to a Bot API method through the resilience gate.
    async fn call_api(
        &self,
        method: &str,
        body: Value,
        fallback: ErrorKind,
    ) -> Result<Value, ConnectorError> {
        let url = self.method_url(method);
        let result = self
            .gate
            .run(|| async {
                let response = self
                    .http
                    .request(Method::POST, &url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| transport_error(PLATFORM, &e))?;
                let text = check_response(PLATFORM, response, fallback).await?;
                parse_api_response(&text, fallback)
            })
            .instrument(self.span.clone())
            .await;
        if let Err(e) = &result {
            debug!(parent: &self.span, method, kind = %e.kind(), "Bot API call failed");
        }
        result
    }

    /// POST a multipart form (file upload) through the resilience gate.
    async fn call_api_multipart(
        &self,
        method: &str,
        form: Form,
        fallback: ErrorKind,
    ) -> Result<Value, ConnectorError> {
        let url = self.method_url(method);
        let url = &url;
        self.gate
            .run(|| async move {
                let response = self
                    .http
                    .request(Method::POST, url)
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|e| transport_error(PLATFORM, &e))?;
                let text = check_response(PLATFORM, response, fallback).await?;
                parse_api_response(&text, fallback)
            })
            .instrument(self.span.clone())
            .await
    }

    async fn get_me(&self) -> Result<UserInfo, ConnectorError> {
        let result = self.call_api("getMe", json!({}), ErrorKind::Connection).await?;
        let user: TelegramUser = serde_json::from_value(result).map_err(|e| {
            ConnectorError::connection(PLATFORM, format!("unexpected getMe result: {e}"))
        })?;
        Ok(to_user_info(&user))
    }

    fn poll_worker(&self) -> Poller {
        Poller {
            http: self.http.clone(),
            url: self.method_url("getUpdates"),
            timeout_secs: self.poll_timeout_secs,
            events: self.events.clone(),
            breaker: Arc::clone(self.gate.breaker()),
        }
    }

    fn stop_poller(&self) -> bool {
        match lock(&self.poller).take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decode a Bot API envelope, mapping `ok: false` onto the error taxonomy.
fn parse_api_response(body: &str, fallback: ErrorKind) -> Result<Value, ConnectorError> {
    let envelope: TelegramResponse<Value> = serde_json::from_str(body).map_err(|e| {
        ConnectorError::from_kind(fallback, PLATFORM, format!("invalid Bot API response: {e}"))
    })?;
    if envelope.ok {
        return envelope.result.ok_or_else(|| {
            ConnectorError::from_kind(fallback, PLATFORM, "Bot API response has no result")
        });
    }
    let description = sanitize_error_body(
        envelope
            .description
            .as_deref()
            .unwrap_or("unknown Bot API error"),
    );
    let err = match envelope.error_code {
        Some(401 | 403) => ConnectorError::authentication(PLATFORM, description),
        Some(429) => {
            let retry_after = envelope
                .parameters
                .and_then(|p| p.retry_after)
                .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs);
            ConnectorError::rate_limit(PLATFORM, description, retry_after)
        }
        _ => ConnectorError::from_kind(fallback, PLATFORM, description),
    };
    Err(match envelope.error_code {
        Some(code) => err.with_detail("error_code", code),
        None => err,
    })
}

/// Bot API method and form field for a media kind.
fn media_method(kind: MediaKind) -> (&'static str, &'static str) {
    match kind {
        MediaKind::Image => ("sendPhoto", "photo"),
        MediaKind::Video => ("sendVideo", "video"),
        MediaKind::Audio => ("sendAudio", "audio"),
        MediaKind::Document => ("sendDocument", "document"),
        MediaKind::Sticker => ("sendSticker", "sticker"),
        MediaKind::Voice => ("sendVoice", "voice"),
        MediaKind::Animation => ("sendAnimation", "animation"),
    }
}

/// Map core event names onto Telegram `allowed_updates` values.
fn allowed_updates(config: &WebhookConfig) -> Option<Vec<&'static str>> {
    if config.wants_all_events() {
        return None;
    }
    let mut updates: Vec<&'static str> = Vec::new();
    for name in &config.events {
        let mapped: &[&'static str] = match name.as_str() {
            "message_received" => &["message", "channel_post"],
            "message_edited" => &["edited_message", "edited_channel_post"],
            "reaction_added" | "reaction_removed" => &["message_reaction"],
            "user_joined" | "user_left" => &["message", "chat_member"],
            _ => &[],
        };
        for update in mapped {
            if !updates.contains(update) {
                updates.push(update);
            }
        }
    }
    Some(updates)
}

/// Message ids are integers on the wire; keep anything else as a string so
/// the API reports it.
fn id_value(id: &str) -> Value {
    id.parse::<i64>().map_or_else(|_| Value::from(id), Value::from)
}

fn message_id_of(result: &Value) -> Option<String> {
    result.get("message_id").and_then(Value::as_i64).map(|id| id.to_string())
}

#[async_trait]
impl Adapter for TelegramAdapter {
    fn platform(&self) -> &str {
        PLATFORM
    }

    fn state(&self) -> AdapterState {
        self.lifecycle.state()
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        if self.lifecycle.is_connected() {
            return Ok(());
        }
        let me = self.get_me().await?;
        info!(parent: &self.span, bot = me.username.as_deref().unwrap_or_default(), "Telegram bot authenticated");
        *lock(&self.me) = Some(me);
        self.lifecycle.mark_connected();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        self.stop_poller();
        self.lifecycle.mark_disconnected();
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        match self.get_me().await {
            Ok(_) => HealthStatus::healthy(PLATFORM, start.elapsed()),
            Err(e) => HealthStatus::unhealthy(PLATFORM, e.to_string()),
        }
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<MessageResponse, ConnectorError> {
        self.lifecycle.ensure_connected()?;
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(reply_to) = reply_to {
            body["reply_parameters"] = json!({ "message_id": id_value(reply_to) });
        }
        let result = self.call_api("sendMessage", body, ErrorKind::Message).await?;
        debug!(parent: &self.span, chat_id, "sent Telegram message");
        sent_response(result)
    }

    async fn send_media(
        &self,
        chat_id: &str,
        media: &Media,
        caption: Option<&str>,
    ) -> Result<MessageResponse, ConnectorError> {
        self.lifecycle.ensure_connected()?;
        let (method, field) = media_method(media.kind);
        let caption = caption.filter(|_| media.kind != MediaKind::Sticker);

        let result = match &media.source {
            MediaSource::Bytes(bytes) => {
                let file_name = media
                    .file_name
                    .clone()
                    .unwrap_or_else(|| field.to_owned());
                let mut part = Part::bytes(bytes.clone()).file_name(file_name);
                if let Some(mime) = &media.mime_type {
                    part = part.mime_str(mime).map_err(|e| {
                        ConnectorError::media(PLATFORM, format!("invalid MIME type '{mime}': {e}"))
                    })?;
                }
                let mut form = Form::new()
                    .text("chat_id", chat_id.to_owned())
                    .part(field, part);
                if let Some(caption) = caption {
                    form = form.text("caption", caption.to_owned());
                }
                self.call_api_multipart(method, form, ErrorKind::Media).await?
            }
            source => {
                let reference = match source {
                    MediaSource::Url(url) => Some(url.clone()),
                    _ => media
                        .raw
                        .get(FILE_ID_KEY)
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                };
                let reference = reference.ok_or_else(|| {
                    ConnectorError::media(PLATFORM, "media has no URL, content or file id")
                })?;
                let mut body = json!({ "chat_id": chat_id });
                body[field] = Value::from(reference);
                if let Some(caption) = caption {
                    body["caption"] = Value::from(caption);
                }
                self.call_api(method, body, ErrorKind::Media).await?
            }
        };
        debug!(parent: &self.span, chat_id, method, "sent Telegram media");
        sent_response(result)
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        new_text: &str,
    ) -> Result<MessageResponse, ConnectorError> {
        self.lifecycle.ensure_connected()?;
        let body = json!({
            "chat_id": chat_id,
            "message_id": id_value(message_id),
            "text": new_text,
        });
        let result = self.call_api("editMessageText", body, ErrorKind::Message).await?;
        // Inline messages answer `true` instead of the edited message.
        let id = message_id_of(&result).unwrap_or_else(|| message_id.to_owned());
        Ok(MessageResponse::sent(PLATFORM, id).with_raw("result", result))
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<bool, ConnectorError> {
        self.lifecycle.ensure_connected()?;
        let body = json!({ "chat_id": chat_id, "message_id": id_value(message_id) });
        let result = self.call_api("deleteMessage", body, ErrorKind::Message).await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    async fn get_messages(&self, _chat_id: &str, _limit: usize) -> Result<Vec<Message>, ConnectorError> {
        // The Bot API exposes no chat history.
        Err(ConnectorError::unsupported(PLATFORM, "get_messages"))
    }

    async fn get_user_info(&self, user_id: &str) -> Result<UserInfo, ConnectorError> {
        self.lifecycle.ensure_connected()?;
        let result = self
            .call_api("getChat", json!({ "chat_id": user_id }), ErrorKind::Message)
            .await?;
        let chat: TelegramChat = serde_json::from_value(result).map_err(|e| {
            ConnectorError::message(PLATFORM, format!("unexpected getChat result: {e}"))
        })?;
        let mut user = UserInfo::new(chat.id.to_string(), PLATFORM);
        user.username = chat.username.clone();
        user.display_name = display_name(chat.first_name.as_deref(), chat.last_name.as_deref())
            .or_else(|| chat.title.clone());
        user.raw.insert("chat_type".to_owned(), Value::from(chat.chat_type));
        Ok(user)
    }

    async fn set_webhook(&self, config: &WebhookConfig) -> Result<bool, ConnectorError> {
        self.lifecycle.ensure_connected()?;
        let mut body = json!({ "url": config.url });
        if let Some(secret) = &config.secret {
            body["secret_token"] = Value::from(secret.as_str());
        }
        if let Some(updates) = allowed_updates(config) {
            body["allowed_updates"] = json!(updates);
        }
        let result = self.call_api("setWebhook", body, ErrorKind::Webhook).await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    async fn start_polling(&self) -> Result<(), ConnectorError> {
        if !self.lifecycle.begin_polling()? {
            return Ok(());
        }
        let poller = self.poll_worker();
        let handle = tokio::spawn(poller.run().instrument(self.span.clone()));
        if let Some(previous) = lock(&self.poller).replace(handle) {
            previous.abort();
        }
        info!(parent: &self.span, "Telegram polling started");
        Ok(())
    }

    async fn stop_polling(&self) -> Result<(), ConnectorError> {
        let stopped = self.stop_poller();
        self.lifecycle.end_polling();
        if stopped {
            info!(parent: &self.span, "Telegram polling stopped");
        }
        Ok(())
    }
}

impl Drop for TelegramAdapter {
    fn drop(&mut self) {
        self.stop_poller();
    }
}

fn sent_response(result: Value) -> Result<MessageResponse, ConnectorError> {
    let id = message_id_of(&result).ok_or_else(|| {
        ConnectorError::message(PLATFORM, "Bot API response has no message_id")
    })?;
    Ok(MessageResponse::sent(PLATFORM, id).with_raw("result", result))
}

// ---------------------------------------------------------------------------
// Inbound polling
// ---------------------------------------------------------------------------

/// State owned by the background `getUpdates` task.
///
/// Long polls pass through the circuit breaker but not the rate limiter; a
/// poll held open for `timeout_secs` is not a request burst.
struct Poller {
    http: HttpTransport,
    url: String,
    timeout_secs: u64,
    events: EventEmitter,
    breaker: Arc<CircuitBreaker>,
}

impl Poller {
    /// Main polling loop with exponential backoff on errors. Runs until
    /// aborted.
    async fn run(self) {
        let mut offset: Option<i64> = None;
        let mut backoff_ms: u64 = INITIAL_BACKOFF_MS;

        loop {
            match self.breaker.call(|| self.poll_updates(offset)).await {
                Ok(updates) => {
                    backoff_ms = INITIAL_BACKOFF_MS;
                    for update in updates {
                        // Advance offset so we don't re-process this update.
                        offset = Some(update.update_id.saturating_add(1));
                        for event in normalize_update(&update) {
                            let event_id = event.id;
                            match self.events.emit(event).await {
                                Ok(report) if !report.is_clean() => warn!(
                                    %event_id,
                                    failures = report.failures.len(),
                                    "some subscribers failed"
                                ),
                                Ok(_) => debug!(%event_id, "normalized Telegram update"),
                                Err(e) => warn!(%event_id, error = %e, "inbound middleware rejected event"),
                            }
                        }
                    }
                }
                Err(e) => {
                    let wait_ms = match e.retry_after() {
                        Some(retry_after)
                            if matches!(e.kind(), ErrorKind::RateLimit | ErrorKind::CircuitOpen)
                                && !retry_after.is_zero() =>
                        {
                            u64::try_from(retry_after.as_millis()).unwrap_or(MAX_BACKOFF_MS)
                        }
                        _ => backoff_ms,
                    };
                    warn!(error = %e, backoff_ms = wait_ms, "Telegram poll error, backing off");
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
                }
            }
        }
    }

    /// Call `getUpdates` on the Telegram Bot API.
    async fn poll_updates(&self, offset: Option<i64>) -> Result<Vec<TelegramUpdate>, ConnectorError> {
        let mut params = json!({ "timeout": self.timeout_secs });
        if let Some(off) = offset {
            params["offset"] = Value::from(off);
        }
        let http_timeout =
            Duration::from_secs(self.timeout_secs.saturating_add(POLL_TIMEOUT_MARGIN_SECS));

        let response = self
            .http
            .request_with_timeout(Method::POST, &self.url, http_timeout)
            .json(&params)
            .send()
            .await
            .map_err(|e| transport_error(PLATFORM, &e))?;
        let body = check_response(PLATFORM, response, ErrorKind::Connection).await?;
        let result = parse_api_response(&body, ErrorKind::Connection)?;

        // Skip updates that fail to decode instead of stalling the offset.
        let raw: Vec<Value> = serde_json::from_value(result).map_err(|e| {
            ConnectorError::connection(PLATFORM, format!("unexpected getUpdates result: {e}"))
        })?;
        Ok(raw
            .into_iter()
            .map(|value| {
                let update_id = value.get("update_id").and_then(Value::as_i64).unwrap_or_default();
                serde_json::from_value(value).unwrap_or_else(|e| {
                    warn!(update_id, error = %e, "skipping undecodable Telegram update");
                    TelegramUpdate {
                        update_id,
                        ..TelegramUpdate::default()
                    }
                })
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize a Telegram `Update` into zero or more core events.
fn normalize_update(update: &TelegramUpdate) -> Vec<Event> {
    if let Some(msg) = update.message.as_ref().or(update.channel_post.as_ref()) {
        if let Some(members) = msg.new_chat_members.as_ref().filter(|m| !m.is_empty()) {
            return members
                .iter()
                .map(|member| membership_event(EventType::UserJoined, msg, member))
                .collect();
        }
        if let Some(member) = &msg.left_chat_member {
            return vec![membership_event(EventType::UserLeft, msg, member)];
        }
        return vec![Event::for_message(EventType::MessageReceived, to_message(msg))];
    }
    if let Some(msg) = &update.edited_message {
        return vec![Event::for_message(EventType::MessageEdited, to_message(msg))];
    }
    if let Some(reaction) = &update.message_reaction {
        return vec![reaction_event(reaction)];
    }
    Vec::new()
}

fn membership_event(event_type: EventType, msg: &TelegramMessage, member: &TelegramUser) -> Event {
    let mut event = Event::new(event_type, PLATFORM)
        .with_chat(msg.chat.id.to_string())
        .with_user(to_user_info(member))
        .with_raw("message_id", msg.message_id);
    event.timestamp = timestamp(msg.date);
    event
}

fn reaction_event(reaction: &TelegramReaction) -> Event {
    let event_type = if reaction.new_reaction.len() >= reaction.old_reaction.len() {
        EventType::ReactionAdded
    } else {
        EventType::ReactionRemoved
    };
    let mut event = Event::new(event_type, PLATFORM)
        .with_chat(reaction.chat.id.to_string())
        .with_raw("message_id", reaction.message_id.to_string())
        .with_raw("new_reaction", reaction.new_reaction.clone())
        .with_raw("old_reaction", reaction.old_reaction.clone());
    if let Some(user) = &reaction.user {
        event = event.with_user(to_user_info(user));
    }
    event.timestamp = timestamp(reaction.date);
    event
}

fn to_message(msg: &TelegramMessage) -> Message {
    let sender = match &msg.from {
        Some(user) => to_user_info(user),
        // Channel posts have no author; attribute them to the chat.
        None => {
            let mut chat = UserInfo::new(msg.chat.id.to_string(), PLATFORM);
            chat.username = msg.chat.username.clone();
            chat.display_name = msg.chat.title.clone();
            chat
        }
    };
    let mut raw = RawMap::new();
    raw.insert("chat_type".to_owned(), Value::from(msg.chat.chat_type.clone()));

    Message {
        id: msg.message_id.to_string(),
        platform: PLATFORM.to_owned(),
        chat_id: msg.chat.id.to_string(),
        sender,
        text: msg.text.clone().or_else(|| msg.caption.clone()),
        media: to_media(msg),
        reply_to_id: msg
            .reply_to_message
            .as_ref()
            .map(|reply| reply.message_id.to_string()),
        timestamp: timestamp(msg.date),
        raw,
    }
}

fn to_media(msg: &TelegramMessage) -> Vec<Media> {
    // Telegram sends every size of a photo; the last is the largest.
    let photo = msg.photo.as_ref().and_then(|sizes| sizes.last());
    [
        (MediaKind::Image, photo),
        (MediaKind::Video, msg.video.as_ref()),
        (MediaKind::Audio, msg.audio.as_ref()),
        (MediaKind::Voice, msg.voice.as_ref()),
        (MediaKind::Document, msg.document.as_ref()),
        (MediaKind::Sticker, msg.sticker.as_ref()),
        (MediaKind::Animation, msg.animation.as_ref()),
    ]
    .into_iter()
    .filter_map(|(kind, file)| {
        let file = file?;
        let mut media = Media::reference(kind);
        media.file_name = file.file_name.clone();
        media.mime_type = file.mime_type.clone();
        media.size_bytes = file.file_size;
        media
            .raw
            .insert(FILE_ID_KEY.to_owned(), Value::from(file.file_id.clone()));
        Some(media)
    })
    .collect()
}

fn to_user_info(user: &TelegramUser) -> UserInfo {
    let mut info = UserInfo::new(user.id.to_string(), PLATFORM);
    info.username = user.username.clone();
    info.display_name = display_name(Some(&user.first_name), user.last_name.as_deref());
    info.is_bot = user.is_bot;
    info
}

fn display_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    match (first, last) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (Some(name), None) | (None, Some(name)) => Some(name.to_owned()),
        (None, None) => None,
    }
}

fn timestamp(unix_secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(unix_secs, 0).unwrap_or_else(Utc::now)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
