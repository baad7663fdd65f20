use std::sync::Arc;

use serde_json::Value;

use crate::classify::Classifier;
use crate::directive::{Directive, parse_directives};
use crate::health::HealthManager;
use crate::pool::RoutePools;
use crate::ratelimit::RateLimitManager;
use crate::session::{SessionRoutingState, SessionStore, TargetSelector};
use crate::target::{RouteCategory, Target};

const DEFAULT_SESSION_SCOPE: &str = "default";

#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("no healthy target for category {category}", category = .category.as_str())]
    NoHealthyTarget { category: RouteCategory },
    #[error("unsupported endpoint for routing")]
    UnsupportedEndpoint,
}

#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub target: Target,
    pub category: RouteCategory,
    /// Session stop-message to append, if one is installed and has budget.
    pub stop_message: Option<String>,
}

/// Selects a concrete target for each request: parses in-band directives,
/// classifies, filters by session state / health / cooldowns, then walks the
/// category's round-robin rotation.
pub struct RouterEngine {
    pools: Arc<RoutePools>,
    classifier: Classifier,
    health: Arc<HealthManager>,
    ratelimit: Arc<RateLimitManager>,
    sessions: Arc<SessionStore>,
}

impl RouterEngine {
    pub fn new(
        pools: Arc<RoutePools>,
        classifier: Classifier,
        health: Arc<HealthManager>,
        ratelimit: Arc<RateLimitManager>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            pools,
            classifier,
            health,
            ratelimit,
            sessions,
        }
    }

    pub fn pools(&self) -> &Arc<RoutePools> {
        &self.pools
    }

    pub fn health(&self) -> &Arc<HealthManager> {
        &self.health
    }

    pub fn ratelimit(&self) -> &Arc<RateLimitManager> {
        &self.ratelimit
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Route one request. Directive markers are stripped from the payload as
    /// a side effect; everything else is pure selection.
    pub async fn route(
        &self,
        payload: &mut Value,
        session_id: Option<&str>,
        request_id: &str,
    ) -> Result<RouteDecision, RouteError> {
        let scope = session_id.unwrap_or(DEFAULT_SESSION_SCOPE);

        let directives = strip_directives(payload);
        if !directives.is_empty() {
            tracing::debug!(request_id, scope, count = directives.len(), "applying directives");
            self.sessions.apply(scope, &directives).await;
        }
        let session = self.sessions.snapshot(scope).await;

        // A fully qualified force bypasses classification entirely.
        if let Some(forced) = &session.forced
            && forced.is_fully_qualified()
        {
            let runtime_key = format!(
                "{}.{}.{}",
                forced.provider,
                forced.key.as_deref().unwrap_or(""),
                forced.model.as_deref().unwrap_or(""),
            );
            if let Some(target) = self.pools.find(&runtime_key)
                && self.eligible(target, &session).await
            {
                return Ok(RouteDecision {
                    target: target.clone(),
                    category: RouteCategory::Default,
                    stop_message: self.sessions.take_stop_message(scope).await,
                });
            }
            tracing::warn!(request_id, runtime_key, "forced target unavailable, drifting");
        }

        let category = self.classifier.classify(payload).category;
        let pool = self.pools.targets(category);
        if pool.is_empty() {
            return Err(RouteError::NoHealthyTarget { category });
        }

        let mut eligibility = Vec::with_capacity(pool.len());
        for target in pool {
            eligibility.push(self.eligible(target, &session).await);
        }

        // Forced (partial) and sticky preferences win when their target is
        // still in the candidate list; otherwise they are ignored as drift.
        for (selector, label) in [(&session.forced, "forced"), (&session.sticky, "sticky")] {
            if let Some(selector) = selector {
                let found = pool
                    .iter()
                    .zip(&eligibility)
                    .find(|(target, ok)| **ok && selector_matches(selector, target));
                match found {
                    Some((target, _)) => {
                        return Ok(RouteDecision {
                            target: target.clone(),
                            category,
                            stop_message: self.sessions.take_stop_message(scope).await,
                        });
                    }
                    None => {
                        tracing::debug!(
                            request_id,
                            provider = %selector.provider,
                            "{label} selection not in candidate list, drifting"
                        );
                    }
                }
            }
        }

        // Round-robin: claim a start index, then advance past ineligible
        // entries. No fallback to other categories.
        let start = self.pools.next_start(category);
        for offset in 0..pool.len() {
            let index = (start + offset) % pool.len();
            if eligibility[index] {
                return Ok(RouteDecision {
                    target: pool[index].clone(),
                    category,
                    stop_message: self.sessions.take_stop_message(scope).await,
                });
            }
        }

        Err(RouteError::NoHealthyTarget { category })
    }

    async fn eligible(&self, target: &Target, session: &SessionRoutingState) -> bool {
        if session.is_target_disabled(&target.provider_id, &target.key_alias, &target.model_id) {
            return false;
        }
        if !self.health.is_available(target.runtime_key()).await {
            return false;
        }
        !self
            .ratelimit
            .is_cooling(&target.provider_key(), &target.model_id)
            .await
    }
}

fn selector_matches(selector: &TargetSelector, target: &Target) -> bool {
    if selector.provider != target.provider_id {
        return false;
    }
    if let Some(key) = &selector.key
        && key != &target.key_alias
    {
        return false;
    }
    if let Some(model) = &selector.model
        && model != &target.model_id
    {
        return false;
    }
    true
}

/// Find the last user message and strip `<**…**>` markers from its text.
fn strip_directives(payload: &mut Value) -> Vec<Directive> {
    let messages = payload
        .get_mut("messages")
        .or_else(|| payload.get_mut("input"))
        .and_then(Value::as_array_mut);
    let Some(messages) = messages else {
        return Vec::new();
    };
    let last_user = messages
        .iter_mut()
        .rev()
        .find(|message| message.get("role").and_then(Value::as_str) == Some("user"));
    let Some(message) = last_user else {
        return Vec::new();
    };

    let mut directives = Vec::new();
    match message.get_mut("content") {
        Some(Value::String(text)) => {
            let (found, cleaned) = parse_directives(text);
            if !found.is_empty() {
                *text = cleaned;
                directives = found;
            }
        }
        Some(Value::Array(parts)) => {
            for part in parts {
                let Some(map) = part.as_object_mut() else {
                    continue;
                };
                if let Some(Value::String(text)) = map.get("text") {
                    let (found, cleaned) = parse_directives(text);
                    if !found.is_empty() {
                        map.insert("text".to_string(), Value::String(cleaned));
                        directives.extend(found);
                    }
                }
            }
        }
        _ => {}
    }
    directives
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn directives_are_stripped_from_string_and_blocks() {
        let mut payload = json!({"messages": [
            {"role": "user", "content": "<**#glm**> hi"}
        ]});
        let directives = strip_directives(&mut payload);
        assert_eq!(directives.len(), 1);
        assert_eq!(payload["messages"][0]["content"], "hi");

        let mut payload = json!({"messages": [
            {"role": "user", "content": [{"type": "text", "text": "<**clear**> go"}]}
        ]});
        let directives = strip_directives(&mut payload);
        assert_eq!(directives, vec![Directive::Clear]);
        assert_eq!(payload["messages"][0]["content"][0]["text"], "go");
    }

    #[test]
    fn only_the_last_user_message_is_scanned() {
        let mut payload = json!({"messages": [
            {"role": "user", "content": "<**#glm**> first"},
            {"role": "assistant", "content": "ok"},
            {"role": "user", "content": "second"}
        ]});
        let directives = strip_directives(&mut payload);
        assert!(directives.is_empty());
        assert_eq!(payload["messages"][0]["content"], "<**#glm**> first");
    }
}
