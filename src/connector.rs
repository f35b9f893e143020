//! The facade: one object per platform that routes calls through the
//! middleware pipeline to the adapter and feeds inbound events to the bus.
//!
//! The connector never retries on its own; retries happen only when a
//! [`RetryMiddleware`](crate::middleware::RetryMiddleware) is registered.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::adapter::{Adapter, AdapterState};
use crate::error::ConnectorError;
use crate::events::{EmitReport, EventBus, EventEmitter, EventSelector, SubscriptionId};
use crate::factory::{AdapterFactory, BreakerScope, ProviderScoped, RateLimitScope, SharedInfra};
use crate::middleware::{CallContext, CallOutcome, Middleware, Payload, Pipeline, Terminal};
use crate::models::{
    AdapterConfig, Event, HealthStatus, Media, Message, MessageResponse, UserInfo, WebhookConfig,
};
use crate::registry::ProviderRegistry;
use crate::resilience::CircuitBreakerConfig;
use crate::transport::HttpTransport;

/// Unified client for one platform.
#[derive(Clone)]
pub struct Connector {
    platform: String,
    adapter: Arc<dyn Adapter>,
    pipeline: Pipeline,
    events: EventEmitter,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("platform", &self.platform)
            .field("state", &self.adapter.state())
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Start building a connector for `provider`.
    pub fn builder(provider: impl Into<String>) -> ConnectorBuilder {
        ConnectorBuilder::new(provider)
    }

    /// Wrap an already built adapter.
    pub fn from_adapter(adapter: Arc<dyn Adapter>, pipeline: Pipeline, events: EventEmitter) -> Self {
        Self {
            platform: adapter.platform().to_owned(),
            adapter,
            pipeline,
            events,
        }
    }

    /// Platform tag.
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// The wrapped adapter.
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    /// Adapter lifecycle state.
    pub fn state(&self) -> AdapterState {
        self.adapter.state()
    }

    /// Outbound middleware.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The bus inbound events are delivered on.
    pub fn event_bus(&self) -> &EventBus {
        self.events.bus()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Connect the adapter. Idempotent.
    ///
    /// # Errors
    ///
    /// Whatever the adapter's `connect` returns.
    pub async fn connect(&self) -> Result<(), ConnectorError> {
        self.adapter.connect().await?;
        info!(platform = %self.platform, "connected");
        Ok(())
    }

    /// Disconnect the adapter.
    ///
    /// # Errors
    ///
    /// Whatever the adapter's `disconnect` returns.
    pub async fn disconnect(&self) -> Result<(), ConnectorError> {
        self.adapter.disconnect().await?;
        info!(platform = %self.platform, "disconnected");
        Ok(())
    }

    /// Check that the platform is reachable.
    pub async fn health_check(&self) -> HealthStatus {
        self.adapter.health_check().await
    }

    /// Start polling for inbound events.
    ///
    /// # Errors
    ///
    /// Connection errors, or unsupported for push-only platforms.
    pub async fn start_polling(&self) -> Result<(), ConnectorError> {
        self.adapter.start_polling().await
    }

    /// Stop polling.
    ///
    /// # Errors
    ///
    /// Whatever the adapter's `stop_polling` returns.
    pub async fn stop_polling(&self) -> Result<(), ConnectorError> {
        self.adapter.stop_polling().await
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] raised by middleware or the adapter.
    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<MessageResponse, ConnectorError> {
        let payload = Payload::SendMessage {
            text: text.to_owned(),
            reply_to: reply_to.map(str::to_owned),
        };
        self.dispatch(Some(chat_id), payload)
            .await?
            .into_sent(&self.platform)
    }

    /// Send a media attachment.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] raised by middleware or the adapter.
    pub async fn send_media(
        &self,
        chat_id: &str,
        media: Media,
        caption: Option<&str>,
    ) -> Result<MessageResponse, ConnectorError> {
        let payload = Payload::SendMedia {
            media,
            caption: caption.map(str::to_owned),
        };
        self.dispatch(Some(chat_id), payload)
            .await?
            .into_sent(&self.platform)
    }

    /// Edit a message.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] raised by middleware or the adapter.
    pub async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        new_text: &str,
    ) -> Result<MessageResponse, ConnectorError> {
        let payload = Payload::EditMessage {
            message_id: message_id.to_owned(),
            new_text: new_text.to_owned(),
        };
        self.dispatch(Some(chat_id), payload)
            .await?
            .into_sent(&self.platform)
    }

    /// Delete a message.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] raised by middleware or the adapter.
    pub async fn delete_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<bool, ConnectorError> {
        let payload = Payload::DeleteMessage {
            message_id: message_id.to_owned(),
        };
        self.dispatch(Some(chat_id), payload)
            .await?
            .into_deleted(&self.platform)
    }

    /// Fetch recent messages, most recent first.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] raised by middleware or the adapter.
    pub async fn get_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ConnectorError> {
        self.dispatch(Some(chat_id), Payload::GetMessages { limit })
            .await?
            .into_messages(&self.platform)
    }

    /// Look up a user.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] raised by middleware or the adapter.
    pub async fn get_user_info(&self, user_id: &str) -> Result<UserInfo, ConnectorError> {
        let payload = Payload::GetUserInfo {
            user_id: user_id.to_owned(),
        };
        self.dispatch(None, payload)
            .await?
            .into_user(&self.platform)
    }

    /// Register a webhook.
    ///
    /// # Errors
    ///
    /// Any [`ConnectorError`] raised by middleware or the adapter.
    pub async fn set_webhook(&self, config: WebhookConfig) -> Result<bool, ConnectorError> {
        self.dispatch(None, Payload::SetWebhook { config })
            .await?
            .into_webhook_set(&self.platform)
    }

    /// Publish a public status update.
    ///
    /// # Errors
    ///
    /// Unsupported on most chat platforms, or any other [`ConnectorError`].
    pub async fn post(&self, text: &str, media: Vec<Media>) -> Result<MessageResponse, ConnectorError> {
        let payload = Payload::Post {
            text: text.to_owned(),
            media,
        };
        self.dispatch(None, payload)
            .await?
            .into_sent(&self.platform)
    }

    async fn dispatch(
        &self,
        chat_id: Option<&str>,
        payload: Payload,
    ) -> Result<CallOutcome, ConnectorError> {
        let mut ctx = CallContext::outbound(self.platform.clone(), chat_id.map(str::to_owned), payload);
        let terminal = AdapterTerminal {
            adapter: self.adapter.as_ref(),
        };
        self.pipeline.execute(&mut ctx, &terminal).await
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Push an externally received event (e.g. from a webhook server)
    /// through inbound middleware to subscribers.
    ///
    /// # Errors
    ///
    /// Errors raised by inbound middleware. Subscriber failures are reported
    /// in the returned [`EmitReport`].
    pub async fn ingest(&self, event: Event) -> Result<EmitReport, ConnectorError> {
        self.events.emit(event).await
    }

    /// Subscribe to inbound events.
    pub fn subscribe<S, F, Fut>(&self, selector: S, callback: F) -> SubscriptionId
    where
        S: Into<EventSelector>,
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.events.bus().subscribe(selector, callback)
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, selector: impl Into<EventSelector>, id: SubscriptionId) -> bool {
        self.events.bus().unsubscribe(selector, id)
    }
}

/// Innermost outbound call: enforces the connected precondition, then
/// invokes the adapter operation named by the payload.
struct AdapterTerminal<'a> {
    adapter: &'a dyn Adapter,
}

#[async_trait]
impl Terminal for AdapterTerminal<'_> {
    async fn call(&self, ctx: &mut CallContext) -> Result<CallOutcome, ConnectorError> {
        if self.adapter.state() == AdapterState::Disconnected {
            return Err(ConnectorError::not_connected(self.adapter.platform()));
        }
        let chat_id = ctx.chat_id.as_deref().unwrap_or_default();
        let adapter = self.adapter;
        match &ctx.payload {
            Payload::SendMessage { text, reply_to } => adapter
                .send_message(chat_id, text, reply_to.as_deref())
                .await
                .map(CallOutcome::Sent),
            Payload::SendMedia { media, caption } => adapter
                .send_media(chat_id, media, caption.as_deref())
                .await
                .map(CallOutcome::Sent),
            Payload::EditMessage {
                message_id,
                new_text,
            } => adapter
                .edit_message(chat_id, message_id, new_text)
                .await
                .map(CallOutcome::Sent),
            Payload::DeleteMessage { message_id } => adapter
                .delete_message(chat_id, message_id)
                .await
                .map(CallOutcome::Deleted),
            Payload::GetMessages { limit } => adapter
                .get_messages(chat_id, *limit)
                .await
                .map(CallOutcome::Messages),
            Payload::GetUserInfo { user_id } => {
                adapter.get_user_info(user_id).await.map(CallOutcome::User)
            }
            Payload::SetWebhook { config } => {
                adapter.set_webhook(config).await.map(CallOutcome::WebhookSet)
            }
            Payload::Post { text, media } => adapter.post(text, media).await.map(CallOutcome::Sent),
            Payload::Event { .. } => Err(ConnectorError::message(
                adapter.platform(),
                "inbound events cannot be sent to an adapter",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`Connector`]: registry lookup, factory construction and
/// middleware registration.
#[derive(Debug)]
pub struct ConnectorBuilder {
    provider: String,
    config: Option<AdapterConfig>,
    registry: Option<Arc<ProviderRegistry>>,
    infra: SharedInfra,
    middleware: Pipeline,
}

impl ConnectorBuilder {
    fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            config: None,
            registry: None,
            infra: SharedInfra {
                scoped: ProviderScoped::global(),
                ..SharedInfra::default()
            },
            middleware: Pipeline::new(),
        }
    }

    /// Adapter configuration. Defaults to `AdapterConfig::new(provider)`.
    #[must_use]
    pub fn config(mut self, config: AdapterConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Registry to resolve from. Defaults to [`ProviderRegistry::global`].
    #[must_use]
    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace all shared infrastructure at once, e.g. one derived from a
    /// config file. Later setters refine it.
    ///
    /// Per-provider limiters and breakers come from `infra.scoped`; builders
    /// left on their defaults share [`ProviderScoped::global`].
    #[must_use]
    pub fn shared_infra(mut self, infra: SharedInfra) -> Self {
        self.infra = infra;
        self
    }

    /// Shared HTTP transport.
    #[must_use]
    pub fn http(mut self, http: HttpTransport) -> Self {
        self.infra.http = http;
        self
    }

    /// Event bus to deliver inbound events on, e.g. one shared by several
    /// connectors.
    #[must_use]
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.infra.events = bus;
        self
    }

    /// Rate limiter sharing.
    #[must_use]
    pub fn rate_limits(mut self, scope: RateLimitScope) -> Self {
        self.infra.rate_limits = scope;
        self
    }

    /// Circuit breaker thresholds.
    #[must_use]
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.infra.breaker = config;
        self
    }

    /// Circuit breaker sharing.
    #[must_use]
    pub fn breaker_scope(mut self, scope: BreakerScope) -> Self {
        self.infra.breaker_scope = scope;
        self
    }

    /// Append an outbound middleware unit (innermost so far).
    #[must_use]
    pub fn middleware(mut self, unit: impl Middleware + 'static) -> Self {
        self.middleware.add(unit);
        self
    }

    /// Append an inbound middleware unit (innermost so far).
    #[must_use]
    pub fn inbound_middleware(mut self, unit: impl Middleware + 'static) -> Self {
        self.infra.inbound.add(unit);
        self
    }

    /// Resolve, validate and construct. Does not connect.
    ///
    /// # Errors
    ///
    /// Whatever [`AdapterFactory::build`] returns.
    pub fn build(self) -> Result<Connector, ConnectorError> {
        let registry = self.registry.unwrap_or_else(ProviderRegistry::global);
        let config = self
            .config
            .unwrap_or_else(|| AdapterConfig::new(self.provider.clone()));
        let factory = AdapterFactory::new(registry, self.infra);
        let adapter = factory.build(&self.provider, config)?;
        let events = factory.emitter_for(&self.provider);
        Ok(Connector::from_adapter(adapter, self.middleware, events))
    }
}
