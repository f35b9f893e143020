//! Adapter factory: resolves a provider, validates its configuration and
//! injects shared infrastructure. Never connects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{info, info_span};
use url::Url;

use crate::adapter::{Adapter, AdapterContext};
use crate::error::ConnectorError;
use crate::events::{EventBus, EventEmitter};
use crate::middleware::Pipeline;
use crate::models::AdapterConfig;
use crate::registry::{ProviderDescriptor, ProviderRegistry};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimitConfig, RateLimiter, ResilienceGate,
};
use crate::transport::HttpTransport;

/// How rate limiters are shared between built adapters.
///
/// An [`AdapterConfig::rate_limit`] always overrides the scope with a
/// dedicated limiter for that adapter.
#[derive(Debug, Clone)]
pub enum RateLimitScope {
    /// One limiter for every adapter.
    Global(Arc<RateLimiter>),
    /// One limiter per provider name, created on first build.
    PerProvider(RateLimitConfig),
    /// A fresh limiter for every build.
    PerAdapter(RateLimitConfig),
}

impl Default for RateLimitScope {
    fn default() -> Self {
        Self::PerAdapter(RateLimitConfig::default())
    }
}

/// How circuit breakers are shared between built adapters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BreakerScope {
    /// A fresh breaker for every build.
    #[default]
    PerAdapter,
    /// One breaker per provider name, so sibling adapters trip together.
    PerProvider,
}

/// Per-provider limiter and breaker tables. Clones share the same tables,
/// so every factory holding a clone hands out the same instances.
#[derive(Debug, Clone, Default)]
pub struct ProviderScoped {
    limiters: Arc<Mutex<HashMap<String, Arc<RateLimiter>>>>,
    breakers: Arc<Mutex<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl ProviderScoped {
    /// Process-wide tables, used by [`ConnectorBuilder`](crate::ConnectorBuilder)
    /// unless it is given its own infrastructure.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<ProviderScoped> = OnceLock::new();
        GLOBAL.get_or_init(Self::default).clone()
    }

    /// The limiter for provider `name`, created from `config` on first use.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::Configuration`] when `config` is not a valid bucket.
    pub fn limiter(
        &self,
        name: &str,
        config: RateLimitConfig,
    ) -> Result<Arc<RateLimiter>, ConnectorError> {
        let mut limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = limiters.get(name) {
            return Ok(Arc::clone(existing));
        }
        let limiter = Arc::new(RateLimiter::new(name, config)?);
        limiters.insert(name.to_owned(), Arc::clone(&limiter));
        Ok(limiter)
    }

    /// The breaker for provider `name`, created from `config` on first use.
    pub fn breaker(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            breakers
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config))),
        )
    }
}

/// Infrastructure shared by every adapter the factory builds.
#[derive(Debug, Clone, Default)]
pub struct SharedInfra {
    /// Pooled HTTP client.
    pub http: HttpTransport,
    /// Bus inbound events are emitted on.
    pub events: EventBus,
    /// Inbound middleware run before the bus.
    pub inbound: Pipeline,
    /// Limiter sharing.
    pub rate_limits: RateLimitScope,
    /// Breaker thresholds.
    pub breaker: CircuitBreakerConfig,
    /// Breaker sharing.
    pub breaker_scope: BreakerScope,
    /// Instances handed out under the per-provider scopes.
    pub scoped: ProviderScoped,
}

/// Builds adapters from registry descriptors.
#[derive(Debug)]
pub struct AdapterFactory {
    registry: Arc<ProviderRegistry>,
    infra: SharedInfra,
}

impl AdapterFactory {
    /// Factory over `registry` sharing `infra`.
    pub fn new(registry: Arc<ProviderRegistry>, infra: SharedInfra) -> Self {
        Self { registry, infra }
    }

    /// Factory over the global registry with default infrastructure.
    pub fn with_defaults() -> Self {
        Self::new(ProviderRegistry::global(), SharedInfra::default())
    }

    /// The registry providers are resolved from.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Shared infrastructure.
    pub fn infra(&self) -> &SharedInfra {
        &self.infra
    }

    /// Inbound hook for `platform`, as injected into its adapters.
    pub fn emitter_for(&self, platform: &str) -> EventEmitter {
        EventEmitter::new(platform, self.infra.events.clone(), self.infra.inbound.clone())
    }

    /// Resolve, validate and construct provider `name`.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::ProviderNotFound`] for an unknown name,
    /// [`ConnectorError::Configuration`] for an invalid config, or whatever
    /// the provider's constructor returns.
    pub fn build(
        &self,
        name: &str,
        config: AdapterConfig,
    ) -> Result<Arc<dyn Adapter>, ConnectorError> {
        let descriptor = self.registry.resolve(name)?;
        validate_config(&descriptor, name, &config)?;

        let limiter = self.limiter_for(name, &config)?;
        let breaker = self.breaker_for(name);
        let http = if config.timeout() == self.infra.http.timeout() {
            self.infra.http.clone()
        } else {
            HttpTransport::from_client(self.infra.http.client().clone(), config.timeout())
        };

        let ctx = AdapterContext {
            config,
            http,
            gate: ResilienceGate::new(limiter, breaker),
            events: self.emitter_for(name),
            span: info_span!("adapter", provider = %name),
        };
        let adapter = descriptor.construct(ctx)?;
        info!(provider = %name, "adapter built");
        Ok(adapter)
    }

    fn limiter_for(
        &self,
        name: &str,
        config: &AdapterConfig,
    ) -> Result<Arc<RateLimiter>, ConnectorError> {
        if let Some(per_second) = config.rate_limit() {
            let limit = RateLimitConfig::per_second(per_second).with_timeout(config.timeout());
            return RateLimiter::new(name, limit).map(Arc::new);
        }
        match &self.infra.rate_limits {
            RateLimitScope::Global(limiter) => Ok(Arc::clone(limiter)),
            RateLimitScope::PerAdapter(limit) => RateLimiter::new(name, *limit).map(Arc::new),
            RateLimitScope::PerProvider(limit) => self.infra.scoped.limiter(name, *limit),
        }
    }

    fn breaker_for(&self, name: &str) -> Arc<CircuitBreaker> {
        match self.infra.breaker_scope {
            BreakerScope::PerAdapter => Arc::new(CircuitBreaker::new(name, self.infra.breaker)),
            BreakerScope::PerProvider => self.infra.scoped.breaker(name, self.infra.breaker),
        }
    }
}

/// Check `config` against what provider `requested` needs.
///
/// # Errors
///
/// Returns [`ConnectorError::Configuration`] describing the first problem.
/// Missing credentials are listed together under the `missing` detail.
pub fn validate_config(
    descriptor: &ProviderDescriptor,
    requested: &str,
    config: &AdapterConfig,
) -> Result<(), ConnectorError> {
    let provider = config.provider().trim();
    if provider.is_empty() {
        return Err(ConnectorError::configuration(
            requested,
            "config provider must not be empty",
        ));
    }
    if provider != requested {
        return Err(ConnectorError::configuration(
            requested,
            format!("config is for provider '{provider}', not '{requested}'"),
        ));
    }
    if config.timeout().is_zero() {
        return Err(ConnectorError::configuration(requested, "timeout must be positive")
            .with_detail("field", "timeout"));
    }
    if let Some(base_url) = config.base_url() {
        let parsed = Url::parse(base_url).map_err(|e| {
            ConnectorError::configuration(requested, format!("invalid base_url: {e}"))
                .with_detail("field", "base_url")
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConnectorError::configuration(
                requested,
                format!("base_url must be http or https, got '{}'", parsed.scheme()),
            )
            .with_detail("field", "base_url"));
        }
    }
    if let Some(per_second) = config.rate_limit() {
        if !per_second.is_finite() || per_second <= 0.0 {
            return Err(ConnectorError::configuration(
                requested,
                format!("rate_limit must be positive, got {per_second}"),
            )
            .with_detail("field", "rate_limit"));
        }
    }

    let missing: Vec<String> = descriptor
        .required_credentials()
        .iter()
        .filter(|key| {
            config
                .credential(key)
                .map_or(true, |value| value.trim().is_empty())
        })
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ConnectorError::configuration(
            requested,
            format!("missing required credentials: {}", missing.join(", ")),
        )
        .with_detail("missing", missing));
    }
    Ok(())
}
