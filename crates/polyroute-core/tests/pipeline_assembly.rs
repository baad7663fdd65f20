use std::path::PathBuf;
use std::sync::Arc;

use polyroute_common::EnvOverrides;
use polyroute_core::{AppState, ConfigDocument, ProxyService};
use polyroute_protocol::Protocol;
use polyroute_router::RouteCategory;
use serde_json::json;

fn document() -> ConfigDocument {
    serde_json::from_value(json!({
        "providers": {
            "openai": {
                "family": "openai",
                "base_url": "https://api.openai.com/v1",
                "models": {"gpt-4": {}},
                "keys": {"k1": {"type": "apikey", "value": "sk-test"}}
            },
            "glm": {
                "family": "glm",
                "base_url": "https://open.bigmodel.cn/api/paas/v4",
                "endpoint": "/chat/completions",
                "models": {"glm-4": {}},
                "keys": {"k1": {"type": "apikey", "value": "sk-glm"}}
            }
        },
        "routing": {
            "default": ["openai.k1.gpt-4", "glm.k1.glm-4"],
            "coding": ["glm.k1.glm-4"]
        }
    }))
    .unwrap()
}

fn state() -> Arc<AppState> {
    AppState::new(
        &document(),
        EnvOverrides::default(),
        PathBuf::from("/tmp/polyroute-core-test"),
    )
    .unwrap()
}

// S1 groundwork: the default pool target resolves to the expected outbound
// URL and bearer header scheme.
#[tokio::test]
async fn pipeline_targets_resolve_to_adapters() {
    let state = state();
    let table = state.table();
    let targets = table.pools.targets(RouteCategory::Default);
    assert_eq!(targets.len(), 2);

    let pipeline = state
        .assembler
        .assemble(&table, Protocol::OpenaiChat, &targets[0])
        .unwrap();
    assert_eq!(
        pipeline.adapter.endpoint_url("gpt-4", false),
        "https://api.openai.com/v1/chat/completions"
    );
    assert_eq!(pipeline.provider_protocol, Protocol::OpenaiChat);

    // instances are reused across assemblies
    let again = state
        .assembler
        .assemble(&table, Protocol::OpenaiChat, &targets[0])
        .unwrap();
    assert!(Arc::ptr_eq(&pipeline.adapter, &again.adapter));
    assert!(Arc::ptr_eq(&pipeline.compat, &again.compat));
}

#[tokio::test]
async fn models_are_listed_from_config() {
    let service = ProxyService::new(state());
    let models = service.models();
    let ids: Vec<&str> = models["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|model| model["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"gpt-4"));
    assert!(ids.contains(&"glm-4"));
    assert_eq!(service.model("gpt-4").unwrap()["owned_by"], "openai");
    assert!(service.model("nope").is_none());
}

#[tokio::test]
async fn reload_swaps_the_table_atomically() {
    let state = state();
    let before = state.table();

    let mut doc = document();
    doc.routing.remove("coding");
    state.reload(&doc).unwrap();

    let after = state.table();
    assert!(!Arc::ptr_eq(&before, &after));
    // the old table still answers for in-flight requests
    assert_eq!(before.pools.targets(RouteCategory::Coding).len(), 1);
    assert!(after.pools.targets(RouteCategory::Coding).is_empty());
}
