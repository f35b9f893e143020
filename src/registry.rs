//! Provider registry: name to constructor lookup.
//!
//! The registry is an ordinary value that can be built and injected; a lazily
//! initialised process-wide instance pre-loaded with the built-in providers
//! is available through [`ProviderRegistry::global`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::debug;

use crate::adapter::{Adapter, AdapterContext};
use crate::error::{ConnectorError, CORE_PLATFORM};

/// Builds an adapter from its injected context.
pub type AdapterConstructor =
    Arc<dyn Fn(AdapterContext) -> Result<Arc<dyn Adapter>, ConnectorError> + Send + Sync>;

/// A registered provider.
#[derive(Clone)]
pub struct ProviderDescriptor {
    name: String,
    required_credentials: Vec<String>,
    constructor: AdapterConstructor,
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("required_credentials", &self.required_credentials)
            .finish_non_exhaustive()
    }
}

impl ProviderDescriptor {
    /// Describe provider `name` built by `constructor`.
    pub fn new<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(AdapterContext) -> Result<Arc<dyn Adapter>, ConnectorError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            required_credentials: Vec::new(),
            constructor: Arc::new(constructor),
        }
    }

    /// Declare credential keys the factory must find before constructing.
    #[must_use]
    pub fn requires(mut self, keys: &[&str]) -> Self {
        self.required_credentials = keys.iter().map(|k| (*k).to_owned()).collect();
        self
    }

    /// Provider name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Required credential keys.
    pub fn required_credentials(&self) -> &[String] {
        &self.required_credentials
    }

    /// Run the constructor.
    ///
    /// # Errors
    ///
    /// Whatever the constructor returns.
    pub fn construct(&self, ctx: AdapterContext) -> Result<Arc<dyn Adapter>, ConnectorError> {
        (self.constructor)(ctx)
    }
}

/// Thread-safe provider table. Entries are write-once per name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, ProviderDescriptor>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.list())
            .finish()
    }
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in providers registered.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        crate::providers::register_builtin(&registry);
        registry
    }

    /// Process-wide registry, created with the built-ins on first use.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<ProviderRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::with_builtin())))
    }

    /// Add a provider.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] if the name is empty or
    /// already registered; the table is left unchanged.
    pub fn register(&self, mut descriptor: ProviderDescriptor) -> Result<(), ConnectorError> {
        let name = descriptor.name.trim().to_owned();
        if name.is_empty() {
            return Err(ConnectorError::configuration(
                CORE_PLATFORM,
                "provider name must not be empty",
            ));
        }
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if providers.contains_key(&name) {
            return Err(ConnectorError::configuration(
                CORE_PLATFORM,
                format!("provider '{name}' is already registered"),
            )
            .with_detail("provider", name));
        }
        debug!(provider = %name, "provider registered");
        descriptor.name.clone_from(&name);
        providers.insert(name, descriptor);
        Ok(())
    }

    /// Look up a provider.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::ProviderNotFound`] listing the known names.
    pub fn resolve(&self, name: &str) -> Result<ProviderDescriptor, ConnectorError> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(descriptor) = providers.get(name) {
            return Ok(descriptor.clone());
        }
        let mut known: Vec<String> = providers.keys().cloned().collect();
        known.sort();
        Err(ConnectorError::provider_not_found(name, known))
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
