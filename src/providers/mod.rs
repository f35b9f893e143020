//! Built-in platform adapters.
//!
//! - [`loopback`]: in-memory adapter for tests and dry runs.
//! - [`telegram`]: Telegram Bot API over HTTPS with long polling.
//!
//! Further platforms plug in through
//! [`ProviderRegistry::register`](crate::registry::ProviderRegistry::register)
//! without touching this module.

use tracing::warn;

use crate::registry::ProviderRegistry;

pub mod loopback;
pub mod telegram;

/// Register every built-in provider on `registry`.
///
/// A name that is already taken keeps its existing descriptor.
pub fn register_builtin(registry: &ProviderRegistry) {
    for descriptor in [loopback::descriptor(), telegram::descriptor()] {
        let name = descriptor.name().to_owned();
        if let Err(e) = registry.register(descriptor) {
            warn!(provider = %name, error = %e, "built-in provider not registered");
        }
    }
}
