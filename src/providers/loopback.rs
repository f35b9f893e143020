//! In-memory reference adapter.
//!
//! Stores messages per chat and echoes every outbound message back as an
//! inbound `message_received` event, so the whole outbound and inbound path
//! can be exercised without a network. Used by tests and by the CLI for dry
//! runs.
//!
//! Extras understood in [`AdapterConfig`](crate::models::AdapterConfig):
//! - `echo` (bool, default `true`): emit inbound events for outbound sends.
//! - `fail_connect` (bool): make `connect` fail with an authentication error.
//! - `fail_sends` (integer): fail that many sends with a connection error
//!   before succeeding, for exercising retry and circuit breaking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn, Instrument};

use crate::adapter::{Adapter, AdapterContext, AdapterState, Lifecycle};
use crate::error::ConnectorError;
use crate::events::{EmitReport, EventEmitter};
use crate::models::{
    Event, EventType, HealthStatus, Media, Message, MessageResponse, RawMap, UserInfo,
    WebhookConfig,
};
use crate::registry::ProviderDescriptor;
use crate::resilience::ResilienceGate;

/// Provider name.
pub const PLATFORM: &str = "loopback";

/// Chat that `post` publishes to.
pub const PUBLIC_CHAT: &str = "public";

/// Id of the user outbound messages are attributed to.
pub const SELF_USER_ID: &str = "loopback-bot";

/// Registry entry for the loopback provider. Needs no credentials.
pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor::new(PLATFORM, |ctx| Ok(Arc::new(LoopbackAdapter::new(ctx)) as Arc<dyn Adapter>))
}

/// In-memory adapter.
#[derive(Debug)]
pub struct LoopbackAdapter {
    lifecycle: Lifecycle,
    gate: ResilienceGate,
    events: EventEmitter,
    span: tracing::Span,
    echo: bool,
    fail_connect: bool,
    failures_left: AtomicU64,
    next_id: AtomicU64,
    chats: Mutex<HashMap<String, Vec<Message>>>,
    users: Mutex<HashMap<String, UserInfo>>,
    webhook: Mutex<Option<WebhookConfig>>,
}

impl LoopbackAdapter {
    /// Build from the factory context.
    pub fn new(ctx: AdapterContext) -> Self {
        let flag = |key: &str| ctx.config.extra(key).and_then(serde_json::Value::as_bool);
        let echo = flag("echo").unwrap_or(true);
        let fail_connect = flag("fail_connect").unwrap_or(false);
        let fail_sends = ctx
            .config
            .extra("fail_sends")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);

        let mut me = UserInfo::new(SELF_USER_ID, PLATFORM);
        me.username = Some(SELF_USER_ID.to_owned());
        me.display_name = Some("Loopback".to_owned());
        me.is_bot = true;

        Self {
            lifecycle: Lifecycle::new(PLATFORM),
            gate: ctx.gate,
            events: ctx.events,
            span: ctx.span,
            echo,
            fail_connect,
            failures_left: AtomicU64::new(fail_sends),
            next_id: AtomicU64::new(1),
            chats: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::from([(me.id.clone(), me)])),
            webhook: Mutex::new(None),
        }
    }

    /// Simulate a message from `sender` arriving in `chat_id`: stores it and
    /// emits `message_received`.
    ///
    /// # Errors
    ///
    /// Errors raised by inbound middleware.
    pub async fn inject(
        &self,
        chat_id: &str,
        sender: UserInfo,
        text: &str,
    ) -> Result<EmitReport, ConnectorError> {
        lock(&self.users).insert(sender.id.clone(), sender.clone());
        let message = self.store(chat_id, sender, Some(text.to_owned()), Vec::new(), None);
        self.events
            .emit(Event::for_message(EventType::MessageReceived, message))
            .instrument(self.span.clone())
            .await
    }

    /// Last registered webhook.
    pub fn webhook(&self) -> Option<WebhookConfig> {
        lock(&self.webhook).clone()
    }

    fn me(&self) -> UserInfo {
        lock(&self.users)
            .get(SELF_USER_ID)
            .cloned()
            .unwrap_or_else(|| UserInfo::new(SELF_USER_ID, PLATFORM))
    }

    fn store(
        &self,
        chat_id: &str,
        sender: UserInfo,
        text: Option<String>,
        media: Vec<Media>,
        reply_to_id: Option<String>,
    ) -> Message {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let message = Message {
            id,
            platform: PLATFORM.to_owned(),
            chat_id: chat_id.to_owned(),
            sender,
            text,
            media,
            reply_to_id,
            timestamp: Utc::now(),
            raw: RawMap::new(),
        };
        lock(&self.chats)
            .entry(chat_id.to_owned())
            .or_default()
            .push(message.clone());
        message
    }

    fn take_injected_failure(&self) -> Result<(), ConnectorError> {
        let injected = self
            .failures_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ConnectorError::connection(PLATFORM, "injected send failure"));
        }
        Ok(())
    }

    /// Store an outbound message through the resilience gate and echo it.
    async fn deliver(
        &self,
        chat_id: &str,
        text: Option<String>,
        media: Vec<Media>,
        reply_to: Option<&str>,
    ) -> Result<MessageResponse, ConnectorError> {
        self.lifecycle.ensure_connected()?;
        let message = self
            .gate
            .run(|| async {
                self.take_injected_failure()?;
                Ok(self.store(chat_id, self.me(), text, media, reply_to.map(str::to_owned)))
            })
            .await?;
        debug!(parent: &self.span, chat_id, message_id = %message.id, "stored outbound message");

        let response = MessageResponse::sent(PLATFORM, message.id.clone())
            .with_raw("chat_id", chat_id)
            .with_raw("message", serde_json::to_value(&message).unwrap_or_default());
        if self.echo {
            self.emit(Event::for_message(EventType::MessageReceived, message))
                .await;
        }
        Ok(response)
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.events.emit(event).instrument(self.span.clone()).await {
            warn!(parent: &self.span, error = %e, "inbound middleware rejected loopback event");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Adapter for LoopbackAdapter {
    fn platform(&self) -> &str {
        PLATFORM
    }

    fn state(&self) -> AdapterState {
        self.lifecycle.state()
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        if self.fail_connect {
            return Err(ConnectorError::authentication(PLATFORM, "connect refused by configuration"));
        }
        self.lifecycle.mark_connected();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        self.lifecycle.mark_disconnected();
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        match self.lifecycle.ensure_connected() {
            Ok(()) => HealthStatus::healthy(PLATFORM, start.elapsed()),
            Err(e) => HealthStatus::unhealthy(PLATFORM, e.to_string()),
        }
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<MessageResponse, ConnectorError> {
        self.deliver(chat_id, Some(text.to_owned()), Vec::new(), reply_to)
            .await
    }

    async fn send_media(
        &self,
        chat_id: &str,
        media: &Media,
        caption: Option<&str>,
    ) -> Result<MessageResponse, ConnectorError> {
        self.deliver(chat_id, caption.map(str::to_owned), vec![media.clone()], None)
            .await
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        new_text: &str,
    ) -> Result<MessageResponse, ConnectorError> {
        self.lifecycle.ensure_connected()?;
        let edited = self
            .gate
            .run(|| async {
                let mut chats = lock(&self.chats);
                let message = chats
                    .get_mut(chat_id)
                    .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
                    .ok_or_else(|| {
                        ConnectorError::message(PLATFORM, format!("message {message_id} not found"))
                            .with_detail("message_id", message_id)
                    })?;
                message.text = Some(new_text.to_owned());
                message.raw.insert("edited".to_owned(), serde_json::Value::Bool(true));
                Ok(message.clone())
            })
            .await?;

        let response = MessageResponse::sent(PLATFORM, edited.id.clone()).with_raw("chat_id", chat_id);
        self.emit(Event::for_message(EventType::MessageEdited, edited))
            .await;
        Ok(response)
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<bool, ConnectorError> {
        self.lifecycle.ensure_connected()?;
        let removed = self
            .gate
            .run(|| async {
                let mut chats = lock(&self.chats);
                let removed = chats.get_mut(chat_id).and_then(|messages| {
                    let index = messages.iter().position(|m| m.id == message_id)?;
                    Some(messages.remove(index))
                });
                Ok(removed)
            })
            .await?;

        match removed {
            Some(message) => {
                self.emit(Event::for_message(EventType::MessageDeleted, message))
                    .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<Message>, ConnectorError> {
        self.lifecycle.ensure_connected()?;
        self.gate
            .run(|| async {
                Ok(lock(&self.chats)
                    .get(chat_id)
                    .map(|messages| messages.iter().rev().take(limit).cloned().collect())
                    .unwrap_or_default())
            })
            .await
    }

    async fn get_user_info(&self, user_id: &str) -> Result<UserInfo, ConnectorError> {
        self.lifecycle.ensure_connected()?;
        self.gate
            .run(|| async {
                lock(&self.users).get(user_id).cloned().ok_or_else(|| {
                    ConnectorError::message(PLATFORM, format!("user {user_id} not found"))
                        .with_detail("user_id", user_id)
                })
            })
            .await
    }

    async fn set_webhook(&self, config: &WebhookConfig) -> Result<bool, ConnectorError> {
        self.lifecycle.ensure_connected()?;
        *lock(&self.webhook) = Some(config.clone());
        debug!(parent: &self.span, url = %config.url, "webhook recorded");
        Ok(true)
    }

    async fn start_polling(&self) -> Result<(), ConnectorError> {
        // Echoes are delivered synchronously; polling only changes state.
        self.lifecycle.begin_polling()?;
        Ok(())
    }

    async fn stop_polling(&self) -> Result<(), ConnectorError> {
        self.lifecycle.end_polling();
        Ok(())
    }

    async fn post(&self, text: &str, media: &[Media]) -> Result<MessageResponse, ConnectorError> {
        let text = (!text.is_empty()).then(|| text.to_owned());
        self.deliver(PUBLIC_CHAT, text, media.to_vec(), None).await
    }
}
