use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use polyroute_protocol::ProviderFamily;
use polyroute_router::{
    Classifier, HealthConfig, HealthManager, RateLimitConfig, RateLimitManager, RouteCategory,
    RouteError, RoutePools, RouterEngine, SessionStore, Target,
};
use serde_json::json;

fn engine_with_pool(targets: Vec<Target>) -> RouterEngine {
    let mut pools = HashMap::new();
    pools.insert(RouteCategory::Default, targets);
    RouterEngine::new(
        Arc::new(RoutePools::new(pools)),
        Classifier::default(),
        HealthManager::new(HealthConfig {
            recovery_window: Duration::from_secs(3600),
            ..HealthConfig::default()
        }),
        Arc::new(RateLimitManager::new(RateLimitConfig::default())),
        Arc::new(SessionStore::default()),
    )
}

fn target(provider: &str) -> Target {
    Target::new(provider, "k1", "m1", ProviderFamily::Openai)
}

fn chat_payload(text: &str) -> serde_json::Value {
    json!({"model": "m1", "messages": [{"role": "user", "content": text}]})
}

// P3: a fully healthy pool of size k yields k distinct targets over k calls.
#[tokio::test]
async fn healthy_pool_rotates_through_all_targets() {
    let engine = engine_with_pool(vec![target("a"), target("b"), target("c")]);
    let mut seen = HashSet::new();
    for _ in 0..3 {
        let mut payload = chat_payload("hi");
        let decision = engine.route(&mut payload, None, "req").await.unwrap();
        seen.insert(decision.target.runtime_key().to_string());
    }
    assert_eq!(seen.len(), 3);
}

// P1: a disabled target inside its recovery window is never selected.
#[tokio::test]
async fn disabled_target_is_never_selected() {
    let engine = engine_with_pool(vec![target("a"), target("b")]);
    engine
        .health()
        .force_disable("a.k1.m1", Duration::from_secs(3600), "test")
        .await;
    for _ in 0..6 {
        let mut payload = chat_payload("hi");
        let decision = engine.route(&mut payload, None, "req").await.unwrap();
        assert_eq!(decision.target.provider_id, "b");
    }
}

// B1: an empty pool fails fast without touching health state.
#[tokio::test]
async fn empty_pool_is_no_healthy_target() {
    let engine = engine_with_pool(Vec::new());
    let mut payload = chat_payload("hi");
    let err = engine.route(&mut payload, None, "req").await.unwrap_err();
    assert!(matches!(err, RouteError::NoHealthyTarget { .. }));
    assert!(engine.health().snapshot().await.is_empty());
}

// B2: when every target is cooling down there is no cross-category fallback.
#[tokio::test]
async fn cooldowns_exhaust_the_category() {
    let engine = engine_with_pool(vec![target("a"), target("b")]);
    engine.ratelimit().force_failure("a.k1", "m1").await;
    engine.ratelimit().force_failure("b.k1", "m1").await;
    let mut payload = chat_payload("hi");
    let err = engine.route(&mut payload, None, "req").await.unwrap_err();
    assert!(matches!(
        err,
        RouteError::NoHealthyTarget {
            category: RouteCategory::Default
        }
    ));
}

// S5: `#provider` steers the session away, `clear` restores it.
#[tokio::test]
async fn disable_directive_and_clear() {
    let engine = engine_with_pool(vec![target("antigravity"), target("openai")]);

    for _ in 0..4 {
        let mut payload = chat_payload("<**#antigravity**> hello");
        let decision = engine.route(&mut payload, Some("x"), "req").await.unwrap();
        assert_eq!(decision.target.provider_id, "openai");
        assert_eq!(payload["messages"][0]["content"], "hello");
    }

    let mut payload = chat_payload("<**clear**> hi");
    engine.route(&mut payload, Some("x"), "req").await.unwrap();
    let mut seen = HashSet::new();
    for _ in 0..4 {
        let mut payload = chat_payload("hi");
        let decision = engine.route(&mut payload, Some("x"), "req").await.unwrap();
        seen.insert(decision.target.provider_id.clone());
    }
    assert!(seen.contains("antigravity"));
}

// P2: directives in one session never leak into another.
#[tokio::test]
async fn sessions_do_not_observe_each_other() {
    let engine = engine_with_pool(vec![target("a"), target("b")]);

    let mut payload = chat_payload("<**#a**> hello");
    engine.route(&mut payload, Some("s1"), "req").await.unwrap();

    let mut seen = HashSet::new();
    for _ in 0..4 {
        let mut payload = chat_payload("hi");
        let decision = engine.route(&mut payload, Some("s2"), "req").await.unwrap();
        seen.insert(decision.target.provider_id.clone());
    }
    assert!(seen.contains("a"), "s2 still routes to provider a");
}

// I4: a directive applied at turn N is observable at turn N+1.
#[tokio::test]
async fn forced_target_sticks_across_turns() {
    let engine = engine_with_pool(vec![target("a"), target("b")]);

    let mut payload = chat_payload("<**!b**> hello");
    let decision = engine.route(&mut payload, Some("s"), "req").await.unwrap();
    assert_eq!(decision.target.provider_id, "b");

    for _ in 0..3 {
        let mut payload = chat_payload("next turn");
        let decision = engine.route(&mut payload, Some("s"), "req").await.unwrap();
        assert_eq!(decision.target.provider_id, "b");
    }
}

// A forced target that is unavailable is ignored (drift) rather than fatal.
#[tokio::test]
async fn unavailable_forced_target_drifts() {
    let engine = engine_with_pool(vec![target("a"), target("b")]);
    engine
        .health()
        .force_disable("b.k1.m1", Duration::from_secs(3600), "test")
        .await;

    let mut payload = chat_payload("<**!b**> hello");
    let decision = engine.route(&mut payload, Some("s"), "req").await.unwrap();
    assert_eq!(decision.target.provider_id, "a");
}

// S4 analogue at the router level: a daily-quota 429 sidelines the target for
// at least an hour and the next request selects the survivor.
#[tokio::test]
async fn daily_quota_failover() {
    let engine = engine_with_pool(vec![target("t1"), target("t2")]);

    let escalated = engine
        .ratelimit()
        .register_failure("t1.k1", "m1", "you have exceeded today's quota")
        .await;
    assert!(escalated);
    engine
        .health()
        .force_disable("t1.k1.m1", engine.ratelimit().daily_cooldown(), "daily quota")
        .await;

    for _ in 0..4 {
        let mut payload = chat_payload("hi");
        let decision = engine.route(&mut payload, None, "req").await.unwrap();
        assert_eq!(decision.target.provider_id, "t2");
    }
}

#[tokio::test]
async fn stop_message_is_delivered_with_decisions() {
    let engine = engine_with_pool(vec![target("a")]);
    let mut payload = chat_payload("<**/stopmessage keep at it**> go");
    let decision = engine.route(&mut payload, Some("s"), "req").await.unwrap();
    assert_eq!(decision.stop_message.as_deref(), Some("keep at it"));
}
