//! In-process fan-out of normalized inbound events.
//!
//! Delivery order for one `emit` is fixed: exact-type subscribers in
//! registration order, then wildcard subscribers in registration order.
//! Every callback runs in isolation; an error or panic in one is recorded in
//! the [`EmitReport`] and logged, and the remaining callbacks still run.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ConnectorError;
use crate::middleware::{CallContext, CallOutcome, Payload, Pipeline, Terminal};
use crate::models::{Event, EventType};

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type Handler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// Which events a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSelector {
    /// Exactly one event type.
    Type(EventType),
    /// Every event (the `"*"` wildcard).
    All,
}

impl From<EventType> for EventSelector {
    fn from(event_type: EventType) -> Self {
        Self::Type(event_type)
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A callback that failed during an emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerFailure {
    /// Subscription whose callback failed.
    pub subscription: SubscriptionId,
    /// Error text, or the panic payload.
    pub error: String,
    /// Whether the callback panicked rather than returning an error.
    pub panicked: bool,
}

/// Outcome of one [`EventBus::emit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmitReport {
    /// Id of the emitted event.
    pub event_id: Uuid,
    /// Callbacks that completed successfully.
    pub delivered: usize,
    /// Callbacks that returned an error or panicked, in delivery order.
    pub failures: Vec<HandlerFailure>,
    /// Set when inbound middleware dropped the event before the bus.
    pub filtered: bool,
}

impl EmitReport {
    fn new(event_id: Uuid) -> Self {
        Self {
            event_id,
            delivered: 0,
            failures: Vec::new(),
            filtered: false,
        }
    }

    /// Report for an event that never reached the bus.
    pub fn filtered(event_id: Uuid) -> Self {
        Self {
            filtered: true,
            ..Self::new(event_id)
        }
    }

    /// Callbacks attempted.
    pub fn attempted(&self) -> usize {
        self.delivered.saturating_add(self.failures.len())
    }

    /// Whether every attempted callback succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
struct Subscribers {
    typed: HashMap<EventType, Vec<(SubscriptionId, Handler)>>,
    wildcard: Vec<(SubscriptionId, Handler)>,
}

impl Subscribers {
    fn slot(&mut self, selector: EventSelector) -> &mut Vec<(SubscriptionId, Handler)> {
        match selector {
            EventSelector::Type(event_type) => self.typed.entry(event_type).or_default(),
            EventSelector::All => &mut self.wildcard,
        }
    }
}

struct BusInner {
    subscribers: RwLock<Subscribers>,
    next_id: AtomicU64,
}

/// Subscriber table and dispatcher. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// An empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Subscribers::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `callback` for `selector`. Returns the id to unsubscribe with.
    pub fn subscribe<S, F, Fut>(&self, selector: S, callback: F) -> SubscriptionId
    where
        S: Into<EventSelector>,
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let selector = selector.into();
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(move |event| -> HandlerFuture { Box::pin(callback(event)) });
        self.write().slot(selector).push((id, handler));
        debug!(subscription = %id, ?selector, "subscribed");
        id
    }

    /// Remove subscription `id` from `selector`. Returns whether it existed.
    ///
    /// An emit already in progress still delivers to the removed callback;
    /// later emits do not.
    pub fn unsubscribe(&self, selector: impl Into<EventSelector>, id: SubscriptionId) -> bool {
        let mut subscribers = self.write();
        let slot = subscribers.slot(selector.into());
        let before = slot.len();
        slot.retain(|(existing, _)| *existing != id);
        before != slot.len()
    }

    /// Total subscriptions across all selectors.
    pub fn subscriber_count(&self) -> usize {
        let subscribers = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers
            .typed
            .values()
            .map(Vec::len)
            .fold(subscribers.wildcard.len(), usize::saturating_add)
    }

    /// Deliver `event` to its subscribers and report per-callback outcomes.
    ///
    /// Callbacks run sequentially in delivery order over a snapshot of the
    /// table taken when the emit starts.
    pub async fn emit(&self, event: Event) -> EmitReport {
        let snapshot = {
            let subscribers = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let mut handlers: Vec<(SubscriptionId, Handler)> = subscribers
                .typed
                .get(&event.event_type)
                .map(|slot| slot.iter().map(|(id, h)| (*id, Arc::clone(h))).collect())
                .unwrap_or_default();
            handlers.extend(
                subscribers
                    .wildcard
                    .iter()
                    .map(|(id, h)| (*id, Arc::clone(h))),
            );
            handlers
        };

        let mut report = EmitReport::new(event.id);
        for (subscription, handler) in snapshot {
            // Spawning gives each callback its own panic boundary.
            let outcome = tokio::spawn(handler(event.clone())).await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some((format!("{e:#}"), false)),
                Err(join_error) => {
                    let panicked = join_error.is_panic();
                    Some((panic_message(join_error), panicked))
                }
            };
            match failure {
                None => report.delivered = report.delivered.saturating_add(1),
                Some((error, panicked)) => {
                    warn!(
                        subscription = %subscription,
                        event_id = %event.id,
                        event_type = %event.event_type,
                        panicked,
                        error = %error,
                        "event handler failed"
                    );
                    report.failures.push(HandlerFailure {
                        subscription,
                        error,
                        panicked,
                    });
                }
            }
        }
        report
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Subscribers> {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return "handler task was cancelled".to_owned();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// The single hook through which adapters and webhook servers push inbound
/// events: runs the inbound middleware pipeline, then emits on the bus.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    platform: String,
    bus: EventBus,
    pipeline: Pipeline,
}

impl EventEmitter {
    /// Emitter for `platform` feeding `bus` through `pipeline`.
    pub fn new(platform: impl Into<String>, bus: EventBus, pipeline: Pipeline) -> Self {
        Self {
            platform: platform.into(),
            bus,
            pipeline,
        }
    }

    /// The bus events end up on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Run `event` through inbound middleware and emit it.
    ///
    /// # Errors
    ///
    /// Returns whatever error an inbound middleware unit raised. Subscriber
    /// failures are never errors; they are reported in the [`EmitReport`].
    pub async fn emit(&self, event: Event) -> Result<EmitReport, ConnectorError> {
        let event_id = event.id;
        let mut ctx = CallContext::inbound(self.platform.clone(), event);
        let terminal = BusTerminal { bus: &self.bus };
        match self.pipeline.execute(&mut ctx, &terminal).await? {
            CallOutcome::Emitted(report) => Ok(report),
            _ => Ok(EmitReport::filtered(event_id)),
        }
    }
}

struct BusTerminal<'a> {
    bus: &'a EventBus,
}

#[async_trait]
impl Terminal for BusTerminal<'_> {
    async fn call(&self, ctx: &mut CallContext) -> Result<CallOutcome, ConnectorError> {
        match &ctx.payload {
            Payload::Event { event } => Ok(CallOutcome::Emitted(self.bus.emit((**event).clone()).await)),
            other => Err(ConnectorError::message(
                &ctx.platform,
                format!("inbound pipeline received a non-event payload: {}", other.operation()),
            )),
        }
    }
}
