//! Adapter factory: validation and shared infrastructure injection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use socialconnector::providers::loopback::LoopbackAdapter;
use socialconnector::resilience::{CircuitBreakerConfig, RateLimitConfig};
use socialconnector::{
    Adapter, AdapterConfig, AdapterContext, AdapterFactory, AdapterState, BreakerScope,
    ErrorKind, ProviderDescriptor, ProviderRegistry, RateLimitScope, SharedInfra,
};

/// Registry whose `recorder` provider records every context it is built with.
fn recording_registry() -> (Arc<ProviderRegistry>, Arc<Mutex<Vec<AdapterContext>>>) {
    let seen: Arc<Mutex<Vec<AdapterContext>>> = Arc::new(Mutex::new(Vec::new()));
    let registry = ProviderRegistry::with_builtin();
    let sink = Arc::clone(&seen);
    registry
        .register(
            ProviderDescriptor::new("recorder", move |ctx: AdapterContext| {
                if let Ok(mut seen) = sink.lock() {
                    seen.push(ctx.clone());
                }
                Ok(Arc::new(LoopbackAdapter::new(ctx)) as Arc<dyn Adapter>)
            })
            .requires(&["token"]),
        )
        .expect("recorder registers");
    (Arc::new(registry), seen)
}

fn contexts(seen: &Arc<Mutex<Vec<AdapterContext>>>) -> Vec<AdapterContext> {
    match seen.lock() {
        Ok(seen) => seen.clone(),
        Err(err) => panic!("recorder lock poisoned: {err}"),
    }
}

#[test]
fn build_does_not_connect() {
    let factory = AdapterFactory::new(Arc::new(ProviderRegistry::with_builtin()), SharedInfra::default());
    let adapter = factory
        .build("loopback", AdapterConfig::new("loopback"))
        .expect("loopback builds");
    assert_eq!(adapter.platform(), "loopback");
    assert_eq!(adapter.state(), AdapterState::Disconnected);
}

#[test]
fn unknown_provider_fails_before_construction() {
    let factory = AdapterFactory::new(Arc::new(ProviderRegistry::new()), SharedInfra::default());
    let err = factory
        .build("loopback", AdapterConfig::new("loopback"))
        .expect_err("empty registry");
    assert_eq!(err.kind(), ErrorKind::ProviderNotFound);
}

#[test]
fn missing_credentials_are_listed_together() {
    let registry = ProviderRegistry::new();
    registry
        .register(
            ProviderDescriptor::new("multi", |ctx| {
                Ok(Arc::new(LoopbackAdapter::new(ctx)) as Arc<dyn Adapter>)
            })
            .requires(&["api_key", "api_secret", "user_token"]),
        )
        .expect("registers");
    let factory = AdapterFactory::new(Arc::new(registry), SharedInfra::default());

    let config = AdapterConfig::new("multi")
        .with_credential("api_key", "k")
        .with_credential("user_token", "  ");
    let err = factory.build("multi", config).expect_err("incomplete");
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(
        err.details()["missing"],
        serde_json::json!(["api_secret", "user_token"])
    );
}

#[test]
fn config_for_another_provider_is_rejected() {
    let factory = AdapterFactory::with_defaults();
    let err = factory
        .build("loopback", AdapterConfig::new("telegram"))
        .expect_err("mismatched provider");
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn invalid_settings_are_rejected() {
    let factory = AdapterFactory::with_defaults();
    let cases = [
        (AdapterConfig::new("loopback").with_timeout(Duration::ZERO), "timeout"),
        (AdapterConfig::new("loopback").with_base_url("ftp://example.com"), "base_url"),
        (AdapterConfig::new("loopback").with_base_url("not a url"), "base_url"),
        (AdapterConfig::new("loopback").with_rate_limit(0.0), "rate_limit"),
    ];
    for (config, field) in cases {
        let err = factory.build("loopback", config).expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.details()["field"], field);
    }
}

#[test]
fn telegram_requires_a_bot_token() {
    let factory = AdapterFactory::with_defaults();
    let err = factory
        .build("telegram", AdapterConfig::new("telegram"))
        .expect_err("no token");
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.details()["missing"], serde_json::json!(["bot_token"]));
}

#[test]
fn per_provider_scopes_share_limiter_and_breaker() {
    let (registry, seen) = recording_registry();
    let infra = SharedInfra {
        rate_limits: RateLimitScope::PerProvider(RateLimitConfig::new(5, 5.0)),
        breaker_scope: BreakerScope::PerProvider,
        ..SharedInfra::default()
    };
    let factory = AdapterFactory::new(registry, infra);
    let config = AdapterConfig::new("recorder").with_credential("token", "t");
    factory.build("recorder", config.clone()).expect("first build");
    factory.build("recorder", config).expect("second build");

    let built = contexts(&seen);
    assert_eq!(built.len(), 2);
    assert!(Arc::ptr_eq(built[0].gate.limiter(), built[1].gate.limiter()));
    assert!(Arc::ptr_eq(built[0].gate.breaker(), built[1].gate.breaker()));
}

#[test]
fn per_adapter_scopes_isolate_instances() {
    let (registry, seen) = recording_registry();
    let infra = SharedInfra {
        breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            open_duration: Duration::from_secs(5),
        },
        ..SharedInfra::default()
    };
    let factory = AdapterFactory::new(registry, infra);
    let config = AdapterConfig::new("recorder").with_credential("token", "t");
    factory.build("recorder", config.clone()).expect("first build");
    factory.build("recorder", config).expect("second build");

    let built = contexts(&seen);
    assert!(!Arc::ptr_eq(built[0].gate.limiter(), built[1].gate.limiter()));
    assert!(!Arc::ptr_eq(built[0].gate.breaker(), built[1].gate.breaker()));
    assert_eq!(built[0].gate.breaker().config().failure_threshold, 2);
}

#[test]
fn adapter_rate_limit_overrides_the_scope() {
    let (registry, seen) = recording_registry();
    let global = Arc::new(
        socialconnector::resilience::RateLimiter::new("global", RateLimitConfig::default())
            .expect("valid"),
    );
    let infra = SharedInfra {
        rate_limits: RateLimitScope::Global(Arc::clone(&global)),
        ..SharedInfra::default()
    };
    let factory = AdapterFactory::new(registry, infra);

    factory
        .build("recorder", AdapterConfig::new("recorder").with_credential("token", "t"))
        .expect("shared");
    factory
        .build(
            "recorder",
            AdapterConfig::new("recorder")
                .with_credential("token", "t")
                .with_rate_limit(2.0),
        )
        .expect("dedicated");

    let built = contexts(&seen);
    assert!(Arc::ptr_eq(built[0].gate.limiter(), &global));
    assert!(!Arc::ptr_eq(built[1].gate.limiter(), &global));
}

#[test]
fn config_timeout_reaches_the_transport() {
    let (registry, seen) = recording_registry();
    let factory = AdapterFactory::new(registry, SharedInfra::default());
    factory
        .build(
            "recorder",
            AdapterConfig::new("recorder")
                .with_credential("token", "t")
                .with_timeout(Duration::from_secs(7)),
        )
        .expect("builds");
    assert_eq!(contexts(&seen)[0].http.timeout(), Duration::from_secs(7));
}
