//! socialconnector: one client surface over many messaging platforms.
//!
//! A [`Connector`] resolves a provider from the [`ProviderRegistry`], builds
//! its adapter through the [`AdapterFactory`] with shared rate limiting and
//! circuit breaking, wraps every outbound call in a middleware [`Pipeline`],
//! and delivers normalized inbound events on an [`EventBus`].
//!
//! ```no_run
//! # async fn demo() -> Result<(), socialconnector::ConnectorError> {
//! use socialconnector::{Connector, EventType};
//!
//! let connector = Connector::builder("loopback").build()?;
//! connector.subscribe(EventType::MessageReceived, |event| async move {
//!     println!("{:?}", event.message);
//!     Ok(())
//! });
//! connector.connect().await?;
//! connector.send_message("general", "hello", None).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod resilience;
pub mod transport;

pub mod adapter;
pub mod events;
pub mod factory;
pub mod middleware;
pub mod registry;

pub mod connector;
pub mod pagination;
pub mod providers;

pub mod config;
pub mod credentials;
pub mod logging;

pub use adapter::{Adapter, AdapterContext, AdapterState, Lifecycle};
pub use connector::{Connector, ConnectorBuilder};
pub use error::{ConnectorError, ErrorKind};
pub use events::{EmitReport, EventBus, EventEmitter, EventSelector, SubscriptionId};
pub use factory::{AdapterFactory, BreakerScope, ProviderScoped, RateLimitScope, SharedInfra};
pub use middleware::{CallContext, CallOutcome, Middleware, Next, Pipeline};
pub use models::{
    AdapterConfig, Event, EventType, HealthStatus, Media, MediaKind, MediaSource, Message,
    MessageResponse, UserInfo, WebhookConfig,
};
pub use registry::{ProviderDescriptor, ProviderRegistry};
