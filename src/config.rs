//! Configuration loading.
//!
//! `config.toml` holds non-secret settings: logging, resilience defaults and
//! one `[providers.<name>]` table per platform. Secrets stay in `.env`; a
//! provider table names the variables to read through its `credentials` map:
//!
//! ```toml
//! [providers.telegram]
//! timeout_secs = 20
//! credentials = { bot_token = "TELEGRAM_BOT_TOKEN" }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::credentials::Credentials;
use crate::factory::{BreakerScope, RateLimitScope, SharedInfra};
use crate::models::AdapterConfig;
use crate::resilience::{CircuitBreakerConfig, RateLimitConfig, RateLimiter, RetryPolicy};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiter and circuit breaker defaults.
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Retry middleware settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-provider settings keyed by provider name.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory for rotating JSON logs. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: default_log_level(),
        }
    }
}

/// How limiters or breakers are shared between adapters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeSetting {
    /// One instance per built adapter.
    #[default]
    Adapter,
    /// One instance per provider name.
    Provider,
    /// One instance for the whole process (rate limits only).
    Global,
}

/// Rate limiter and circuit breaker defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceConfig {
    /// Consecutive failures that open a circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds a circuit stays open before a trial call.
    #[serde(default = "default_open_secs")]
    pub open_secs: u64,

    /// Token bucket burst size.
    #[serde(default = "default_rate_capacity")]
    pub rate_capacity: u32,

    /// Tokens added per second.
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,

    /// Longest wait for a token, in seconds. Zero waits forever.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Limiter sharing.
    #[serde(default)]
    pub rate_limit_scope: ScopeSetting,

    /// Breaker sharing. `global` is treated as `provider`.
    #[serde(default)]
    pub breaker_scope: ScopeSetting,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_secs: default_open_secs(),
            rate_capacity: default_rate_capacity(),
            refill_per_sec: default_refill_per_sec(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            rate_limit_scope: ScopeSetting::default(),
            breaker_scope: ScopeSetting::default(),
        }
    }
}

impl ResilienceConfig {
    /// Breaker thresholds.
    pub fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            open_duration: Duration::from_secs(self.open_secs),
        }
    }

    /// Token bucket parameters.
    pub fn rate_limit(&self) -> RateLimitConfig {
        let config = RateLimitConfig::new(self.rate_capacity, self.refill_per_sec);
        if self.acquire_timeout_secs == 0 {
            config
        } else {
            config.with_timeout(Duration::from_secs(self.acquire_timeout_secs))
        }
    }

    /// Factory infrastructure matching these settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the token bucket parameters are invalid.
    pub fn shared_infra(&self) -> anyhow::Result<SharedInfra> {
        let limit = self.rate_limit();
        // Reject a bad bucket here rather than on the first build.
        RateLimiter::new("config", limit)?;
        let rate_limits = match self.rate_limit_scope {
            ScopeSetting::Adapter => RateLimitScope::PerAdapter(limit),
            ScopeSetting::Provider => RateLimitScope::PerProvider(limit),
            ScopeSetting::Global => RateLimitScope::Global(Arc::new(RateLimiter::new("global", limit)?)),
        };
        let breaker_scope = match self.breaker_scope {
            ScopeSetting::Adapter => BreakerScope::PerAdapter,
            ScopeSetting::Provider | ScopeSetting::Global => BreakerScope::PerProvider,
        };
        Ok(SharedInfra {
            rate_limits,
            breaker: self.breaker(),
            breaker_scope,
            ..SharedInfra::default()
        })
    }
}

/// Retry middleware settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Whether the CLI installs the retry middleware.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on a single delay, in seconds.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Growth factor between delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Whether to add random jitter.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            multiplier: default_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff policy described by these settings.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_secs(self.max_delay_secs),
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

/// Settings for one provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    /// API base URL override.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Retry count hint passed to the adapter.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Requests per second; gives the adapter its own limiter.
    #[serde(default)]
    pub rate_limit: Option<f64>,

    /// Credential key -> name of the `.env` variable holding it.
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,

    /// Provider-specific options, passed through untouched.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

// Default value functions for serde

fn default_log_level() -> String {
    "info".to_owned()
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_open_secs() -> u64 {
    30
}
fn default_rate_capacity() -> u32 {
    30
}
fn default_refill_per_sec() -> f64 {
    30.0
}
fn default_acquire_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_secs() -> u64 {
    64
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Resolve the [`AdapterConfig`] for provider `name`.
    ///
    /// A provider without a `[providers.<name>]` table gets defaults and no
    /// credentials.
    ///
    /// # Errors
    ///
    /// Returns an error when a credential variable named in the table is not
    /// set in `credentials` or the process environment.
    pub fn adapter_config(&self, name: &str, credentials: &Credentials) -> anyhow::Result<AdapterConfig> {
        let mut config = AdapterConfig::new(name);
        let Some(provider) = self.providers.get(name) else {
            return Ok(config);
        };

        for (key, variable) in &provider.credentials {
            let value = credentials.resolve(variable).ok_or_else(|| {
                anyhow::anyhow!("credential '{key}' for provider '{name}' needs ${variable}, which is not set")
            })?;
            config = config.with_credential(key.clone(), value);
        }
        if let Some(base_url) = &provider.base_url {
            config = config.with_base_url(base_url.clone());
        }
        if let Some(secs) = provider.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(max_retries) = provider.max_retries {
            config = config.with_max_retries(max_retries);
        }
        if let Some(rate_limit) = provider.rate_limit {
            config = config.with_rate_limit(rate_limit);
        }
        for (key, value) in &provider.extra {
            config = config.with_extra(key.clone(), value.clone());
        }
        Ok(config)
    }
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Load `path`, or defaults when it does not exist.
///
/// # Errors
///
/// Returns an error if an existing file cannot be read or parsed.
pub fn load_config_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}

/// Resolve the default config directory (`~/.socialconnector/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".socialconnector"))
}
