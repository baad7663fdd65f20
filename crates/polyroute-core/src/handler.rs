use std::sync::Arc;

use bytes::Bytes;
use polyroute_codec::{CodecCtx, StreamCodec, convert_request, convert_response};
use polyroute_common::{ProxyError, RequestId};
use polyroute_protocol::{EntryEndpoint, Protocol};
use polyroute_provider::{ProviderFailure, ProviderResponse, UpstreamErrorKind, disposition};
use polyroute_router::{RouteError, Target};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::state::AppState;

/// One inbound request, already parsed by the HTTP frontend.
pub struct ProxyCall {
    pub endpoint: EntryEndpoint,
    pub payload: Value,
    pub session_id: Option<String>,
    pub request_id: RequestId,
}

pub enum ProxyReply {
    Json(Value),
    Stream {
        entry: Protocol,
        rx: mpsc::Receiver<Bytes>,
    },
}

/// The request orchestrator: route, assemble, translate, dispatch, retry.
#[derive(Clone)]
pub struct ProxyService {
    state: Arc<AppState>,
}

impl ProxyService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub async fn handle(&self, call: ProxyCall) -> Result<ProxyReply, ProxyError> {
        let entry = call.endpoint.protocol();
        validate(call.endpoint, &call.payload)?;

        let request_id = call.request_id.as_str().to_string();
        let ctx = CodecCtx::new(
            request_id.clone(),
            OffsetDateTime::now_utc().unix_timestamp(),
        );
        let table = self.state.table();
        let mut payload = call.payload;
        let session = call.session_id.as_deref();

        let mut last_error: Option<ProxyError> = None;
        let mut attempts = 0usize;
        loop {
            let decision = match table.engine.route(&mut payload, session, &request_id).await {
                Ok(decision) => decision,
                Err(RouteError::NoHealthyTarget { category }) => {
                    return Err(last_error
                        .unwrap_or_else(|| ProxyError::no_healthy_target(category.as_str())));
                }
                Err(RouteError::UnsupportedEndpoint) => {
                    return Err(ProxyError::unsupported_endpoint(call.endpoint.as_str()));
                }
            };

            // At most pool-size attempts before the last failure surfaces.
            let pool_size = table.pools.targets(decision.category).len().max(1);
            if attempts >= pool_size {
                return Err(last_error
                    .unwrap_or_else(|| ProxyError::no_healthy_target(decision.category.as_str())));
            }
            attempts += 1;

            if attempts == 1
                && let Some(text) = &decision.stop_message
            {
                inject_stop_message(&mut payload, entry, text);
            }

            let target = decision.target.clone();
            tracing::info!(
                request_id,
                provider = %target.provider_id,
                model = %target.model_id,
                key = %target.key_alias,
                category = decision.category.as_str(),
                attempt = attempts,
                "dispatching"
            );

            match self
                .attempt(&table, call.endpoint, entry, &target, &payload, &ctx, &request_id)
                .await
            {
                Ok(reply) => {
                    self.state.health.record_success(target.runtime_key()).await;
                    return Ok(reply);
                }
                Err(AttemptError::Fatal(error)) => return Err(error),
                Err(AttemptError::Upstream(failure)) => {
                    let error = self.bookkeep_failure(&target, &failure).await;
                    if !retryable(failure.kind) {
                        return Err(error);
                    }
                    tracing::warn!(
                        request_id,
                        provider = %target.provider_id,
                        kind = ?failure.kind,
                        "attempt failed, trying next candidate"
                    );
                    last_error = Some(error);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        table: &crate::config::RouterTable,
        endpoint: EntryEndpoint,
        entry: Protocol,
        target: &Target,
        payload: &Value,
        ctx: &CodecCtx,
        request_id: &str,
    ) -> Result<ProxyReply, AttemptError> {
        let pipeline = self
            .state
            .assembler
            .assemble(table, entry, target)
            .map_err(AttemptError::Fatal)?;

        let mut outbound = convert_request(entry, pipeline.provider_protocol, payload.clone(), ctx)
            .map_err(|err| {
                AttemptError::Fatal(ProxyError::validation(format!("request shape: {err}")))
            })?;
        // The route decides the model; the client-facing name is not
        // forwarded upstream.
        if pipeline.provider_protocol != Protocol::GeminiChat {
            polyroute_protocol::set(&mut outbound, "model", json!(target.model_id.clone()));
        }

        pipeline.compat.apply_request(&mut outbound).map_err(|err| {
            AttemptError::Fatal(ProxyError::new(
                400,
                polyroute_common::ErrorKind::Validation,
                err.code(),
                err.to_string(),
            ))
        })?;

        let workflow = crate::workflow::Workflow::for_request(payload);
        let endpoint_override = endpoint_override_for(endpoint, pipeline.provider_protocol);
        let response = workflow
            .execute(&pipeline, outbound, request_id, endpoint_override)
            .await
            .map_err(AttemptError::Upstream)?;

        match response {
            ProviderResponse::Json(mut value) => {
                pipeline.compat.apply_response(&mut value).map_err(|err| {
                    AttemptError::Fatal(ProxyError::protocol_drift(err.code(), err.to_string()))
                })?;
                let reply = convert_response(entry, pipeline.provider_protocol, value, ctx)
                    .map_err(|err| {
                        AttemptError::Fatal(ProxyError::protocol_drift(
                            "ERR_CODEC_RESPONSE",
                            err.to_string(),
                        ))
                    })?;
                Ok(ProxyReply::Json(reply))
            }
            ProviderResponse::Stream { rx, .. } => {
                // The chat→anthropic stream conversion can be toggled off,
                // which degrades to raw forwarding.
                let provider_protocol = if entry == Protocol::AnthropicMessages
                    && pipeline.provider_protocol == Protocol::OpenaiChat
                    && !self.state.env.o2a_stream_enabled
                {
                    entry
                } else {
                    pipeline.provider_protocol
                };
                let codec = StreamCodec::new(entry, provider_protocol, ctx)
                    .map_err(|err| {
                        AttemptError::Fatal(ProxyError::internal(format!(
                            "stream codec: {err}"
                        )))
                    })?;
                let rx = self
                    .state
                    .streaming
                    .spawn(rx, codec, entry, request_id.to_string());
                Ok(ProxyReply::Stream { entry, rx })
            }
        }
    }

    /// Update health and rate-limit managers per the failure table and build
    /// the client-facing error.
    async fn bookkeep_failure(&self, target: &Target, failure: &ProviderFailure) -> ProxyError {
        let runtime_key = target.runtime_key();
        let provider_key = target.provider_key();
        let affects_health = disposition(failure.kind).affects_health;

        match failure.kind {
            UpstreamErrorKind::Network => {
                self.state
                    .ratelimit
                    .register_network_failure(&provider_key, &target.model_id)
                    .await;
            }
            UpstreamErrorKind::RateShort => {
                self.state
                    .ratelimit
                    .register_failure(&provider_key, &target.model_id, &failure.message)
                    .await;
                self.state.health.record_429(runtime_key, &failure.message).await;
            }
            UpstreamErrorKind::RateDaily => {
                self.state
                    .ratelimit
                    .force_failure(&provider_key, &target.model_id)
                    .await;
                self.state
                    .health
                    .force_disable(
                        runtime_key,
                        self.state.ratelimit.daily_cooldown(),
                        "daily quota exhausted",
                    )
                    .await;
            }
            _ => {
                self.state
                    .health
                    .record_error(runtime_key, affects_health, &failure.message)
                    .await;
            }
        }

        match failure.status {
            Some(status) => ProxyError::upstream(
                status,
                failure
                    .upstream_code
                    .clone()
                    .unwrap_or_else(|| format!("ERR_UPSTREAM_{status}")),
                failure.message.clone(),
            ),
            None => ProxyError::new(
                502,
                polyroute_common::ErrorKind::Network,
                "ERR_UPSTREAM_NETWORK",
                failure.message.clone(),
            ),
        }
    }

    /// Model listing synthesized from the descriptor table.
    pub fn models(&self) -> Value {
        let table = self.state.table();
        let data: Vec<Value> = table
            .model_listing()
            .into_iter()
            .map(|(model, provider)| {
                json!({
                    "id": model,
                    "object": "model",
                    "owned_by": provider,
                })
            })
            .collect();
        json!({"object": "list", "data": data})
    }

    pub fn model(&self, id: &str) -> Option<Value> {
        let table = self.state.table();
        table
            .model_listing()
            .into_iter()
            .find(|(model, _)| model == id)
            .map(|(model, provider)| {
                json!({"id": model, "object": "model", "owned_by": provider})
            })
    }

    /// Per-target health snapshot for the liveness endpoint.
    pub async fn health_report(&self) -> Value {
        let snapshot = self.state.health.snapshot().await;
        let targets: Vec<Value> = snapshot
            .into_iter()
            .map(|(key, state)| {
                json!({
                    "target": key,
                    "healthy": !state.disabled,
                    "consecutiveErrors": state.consecutive_errors,
                    "errorCount": state.error_count,
                    "successCount": state.success_count,
                    "disabledReason": state.disabled_reason,
                })
            })
            .collect();
        json!({"status": "ok", "targets": targets})
    }
}

enum AttemptError {
    /// Surfaces immediately; no failover.
    Fatal(ProxyError),
    /// Feeds the managers and may retry the next candidate.
    Upstream(ProviderFailure),
}

/// Handler-level retry policy (§ propagation): rate limits, transport, and
/// 5xx try the next candidate; auth and client errors surface directly.
fn retryable(kind: UpstreamErrorKind) -> bool {
    matches!(
        kind,
        UpstreamErrorKind::Network | UpstreamErrorKind::RateShort | UpstreamErrorKind::Server
    )
}

/// Embeddings and legacy completions reuse the chat pipeline but post to
/// their own paths on chat-protocol upstreams.
fn endpoint_override_for(endpoint: EntryEndpoint, provider: Protocol) -> Option<&'static str> {
    if provider != Protocol::OpenaiChat {
        return None;
    }
    match endpoint {
        EntryEndpoint::Embeddings => Some("/v1/embeddings"),
        EntryEndpoint::Completions => Some("/v1/completions"),
        _ => None,
    }
}

fn validate(endpoint: EntryEndpoint, payload: &Value) -> Result<(), ProxyError> {
    if !payload.is_object() {
        return Err(ProxyError::validation("request body must be a JSON object"));
    }
    match endpoint {
        EntryEndpoint::ChatCompletions | EntryEndpoint::Messages => {
            if !payload.get("messages").is_some_and(Value::is_array) {
                return Err(ProxyError::validation("messages must be an array"));
            }
        }
        EntryEndpoint::Responses => {
            if payload.get("input").is_none() && payload.get("instructions").is_none() {
                return Err(ProxyError::validation("input or instructions required"));
            }
        }
        EntryEndpoint::Embeddings | EntryEndpoint::Completions => {
            if payload.get("input").is_none() && payload.get("prompt").is_none() {
                return Err(ProxyError::validation("input or prompt required"));
            }
        }
        EntryEndpoint::ModelsList | EntryEndpoint::ModelsGet => {
            return Err(ProxyError::unsupported_endpoint(endpoint.as_str()));
        }
    }
    Ok(())
}

fn inject_stop_message(payload: &mut Value, entry: Protocol, text: &str) {
    let message = match entry {
        Protocol::OpenaiResponses => json!({
            "type": "message",
            "role": "user",
            "content": [{"type": "input_text", "text": text}],
        }),
        _ => json!({"role": "user", "content": text}),
    };
    let slot = match entry {
        Protocol::OpenaiResponses => "input",
        _ => "messages",
    };
    if let Some(items) = payload.get_mut(slot).and_then(Value::as_array_mut) {
        items.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_shapeless_bodies() {
        assert!(validate(EntryEndpoint::ChatCompletions, &json!({"messages": []})).is_ok());
        assert!(validate(EntryEndpoint::ChatCompletions, &json!({"messages": "x"})).is_err());
        assert!(validate(EntryEndpoint::ChatCompletions, &json!([])).is_err());
        assert!(validate(EntryEndpoint::Responses, &json!({"input": "hi"})).is_ok());
        assert!(validate(EntryEndpoint::Responses, &json!({})).is_err());
        assert!(validate(EntryEndpoint::ModelsList, &json!({})).is_err());
    }

    #[test]
    fn stop_message_lands_in_the_right_slot() {
        let mut chat = json!({"messages": [{"role": "user", "content": "go"}]});
        inject_stop_message(&mut chat, Protocol::OpenaiChat, "continue");
        assert_eq!(chat["messages"][1]["content"], "continue");

        let mut responses = json!({"input": []});
        inject_stop_message(&mut responses, Protocol::OpenaiResponses, "continue");
        assert_eq!(responses["input"][0]["content"][0]["text"], "continue");
    }

    #[test]
    fn retry_policy_follows_propagation_rules() {
        assert!(retryable(UpstreamErrorKind::Network));
        assert!(retryable(UpstreamErrorKind::RateShort));
        assert!(retryable(UpstreamErrorKind::Server));
        assert!(!retryable(UpstreamErrorKind::RateDaily));
        assert!(!retryable(UpstreamErrorKind::AuthApiKey));
        assert!(!retryable(UpstreamErrorKind::BadRequest));
    }
}
