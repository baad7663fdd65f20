use polyroute_provider::{ProviderFailure, ProviderResponse};
use serde_json::{Value, json};

use crate::pipeline::Pipeline;

/// The streaming-policy stage: decides buffered vs streaming transport and
/// wraps the provider call accordingly.
#[derive(Debug, Clone, Copy)]
pub struct Workflow {
    streaming: bool,
}

impl Workflow {
    /// Streaming is signaled by `stream: true` on OpenAI-shaped requests and
    /// by the same field on anthropic message bodies.
    pub fn for_request(payload: &Value) -> Self {
        Self {
            streaming: payload.get("stream").and_then(Value::as_bool).unwrap_or(false),
        }
    }

    pub fn buffered() -> Self {
        Self { streaming: false }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Execute the provider call with the chosen transport. The stream flag
    /// on the outbound payload is forced to match the decision so a codec
    /// conversion can never leave it stale.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        mut payload: Value,
        request_id: &str,
        endpoint_override: Option<&str>,
    ) -> Result<ProviderResponse, ProviderFailure> {
        if let Some(map) = payload.as_object_mut() {
            // Gemini signals streaming in the URL, not the body.
            if pipeline.provider_protocol == polyroute_protocol::Protocol::GeminiChat {
                map.remove("stream");
            } else if self.streaming {
                map.insert("stream".to_string(), json!(true));
            } else {
                map.remove("stream");
            }
        }
        pipeline
            .adapter
            .send_to(
                payload,
                &pipeline.target.model_id,
                self.streaming,
                request_id,
                endpoint_override,
            )
            .await
    }
}
