use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use polyroute_compat::{glm_coding_request, glm_coding_response, is_glm_coding_host};
use polyroute_protocol::{Protocol, ProviderFamily};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::auth::AuthProvider;
use crate::error::{UpstreamErrorKind, classify_status};
use crate::snapshot::SnapshotWriter;
use crate::transport::{HttpTransport, OutboundBody, OutboundRequest, OutboundResponse};

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub provider_id: String,
    pub family: ProviderFamily,
    pub base_url: String,
    /// Endpoint override; the family protocol picks the default.
    pub endpoint: Option<String>,
    pub default_headers: Vec<(String, String)>,
    pub timeout: Duration,
}

/// Decoded upstream result: either a complete JSON document or a live SSE
/// byte stream.
pub enum ProviderResponse {
    Json(Value),
    Stream {
        status: u16,
        rx: mpsc::Receiver<Bytes>,
    },
}

/// Classified upstream failure, ready for health/rate-limit bookkeeping.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub kind: UpstreamErrorKind,
    pub status: Option<u16>,
    pub upstream_code: Option<String>,
    pub message: String,
}

impl ProviderFailure {
    fn network(message: String) -> Self {
        Self {
            kind: UpstreamErrorKind::Network,
            status: None,
            upstream_code: None,
            message,
        }
    }
}

/// Outbound call for one provider family: URL resolution, header assembly,
/// auth injection, error classification, and the single oauth retry.
pub struct ProviderAdapter {
    config: AdapterConfig,
    auth: AuthProvider,
    transport: Arc<HttpTransport>,
    snapshots: Option<SnapshotWriter>,
}

impl ProviderAdapter {
    pub fn new(
        config: AdapterConfig,
        auth: AuthProvider,
        transport: Arc<HttpTransport>,
        snapshots: Option<SnapshotWriter>,
    ) -> Self {
        Self {
            config,
            auth,
            transport,
            snapshots,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.config.provider_id
    }

    pub fn family(&self) -> ProviderFamily {
        self.config.family
    }

    pub fn auth(&self) -> &AuthProvider {
        &self.auth
    }

    /// Final URL for this request. `/v1` is never doubled when the base url
    /// already carries it.
    pub fn endpoint_url(&self, model: &str, want_stream: bool) -> String {
        self.endpoint_url_for(model, want_stream, None)
    }

    fn endpoint_url_for(
        &self,
        model: &str,
        want_stream: bool,
        endpoint_override: Option<&str>,
    ) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if self.config.family.protocol() == Protocol::GeminiChat && endpoint_override.is_none() {
            let action = if want_stream {
                "streamGenerateContent?alt=sse"
            } else {
                "generateContent"
            };
            return format!("{base}/v1beta/models/{model}:{action}");
        }
        let endpoint = match endpoint_override {
            Some(endpoint) => endpoint.to_string(),
            None => match &self.config.endpoint {
                Some(endpoint) => endpoint.clone(),
                None => match self.config.family.protocol() {
                    Protocol::OpenaiChat => "/v1/chat/completions".to_string(),
                    Protocol::AnthropicMessages => "/v1/messages".to_string(),
                    Protocol::OpenaiResponses => "/v1/responses".to_string(),
                    Protocol::GeminiChat => "/v1/chat/completions".to_string(),
                },
            },
        };
        let endpoint = if endpoint.starts_with('/') {
            endpoint
        } else {
            format!("/{endpoint}")
        };
        if base.ends_with("/v1") && endpoint.starts_with("/v1/") {
            format!("{}{endpoint}", &base[..base.len() - 3])
        } else {
            format!("{base}{endpoint}")
        }
    }

    /// Send a provider-protocol payload. On a 401 with OAuth auth, refresh
    /// the token once and retry; a second 401 surfaces.
    pub async fn send(
        &self,
        payload: Value,
        model: &str,
        want_stream: bool,
        request_id: &str,
    ) -> Result<ProviderResponse, ProviderFailure> {
        self.send_to(payload, model, want_stream, request_id, None)
            .await
    }

    /// `send` with an explicit endpoint (embeddings, legacy completions).
    pub async fn send_to(
        &self,
        mut payload: Value,
        model: &str,
        want_stream: bool,
        request_id: &str,
        endpoint_override: Option<&str>,
    ) -> Result<ProviderResponse, ProviderFailure> {
        let glm_coding = self.config.family == ProviderFamily::Glm
            && is_glm_coding_host(&self.config.base_url);
        if glm_coding {
            glm_coding_request(&mut payload);
        }

        if let Some(snapshots) = &self.snapshots {
            snapshots
                .write(request_id, &self.config.provider_id, &payload)
                .await;
        }

        let body = Bytes::from(serde_json::to_vec(&payload).map_err(|err| ProviderFailure {
            kind: UpstreamErrorKind::Internal,
            status: None,
            upstream_code: None,
            message: format!("payload serialize: {err}"),
        })?);
        let url = self.endpoint_url_for(model, want_stream, endpoint_override);

        let mut refreshed = false;
        loop {
            let headers = self.build_headers().await?;
            let response = self
                .transport
                .send(OutboundRequest {
                    method: "POST",
                    url: url.clone(),
                    headers,
                    body: Some(body.clone()),
                    timeout: self.config.timeout,
                    want_stream,
                })
                .await
                .map_err(|err| ProviderFailure::network(err.to_string()))?;

            if response.status == 401 && self.auth.is_oauth() && !refreshed {
                refreshed = true;
                tracing::info!(
                    provider = %self.config.provider_id,
                    request_id,
                    "upstream 401 with oauth credential, refreshing once"
                );
                self.auth
                    .refresh_credentials()
                    .await
                    .map_err(|err| ProviderFailure {
                        kind: UpstreamErrorKind::AuthOauthExpired,
                        status: Some(401),
                        upstream_code: None,
                        message: format!("token refresh failed: {err}"),
                    })?;
                continue;
            }

            return self.decode_response(response, glm_coding);
        }
    }

    async fn build_headers(&self) -> Result<Vec<(String, String)>, ProviderFailure> {
        let mut headers: Vec<(String, String)> = vec![(
            "content-type".to_string(),
            "application/json".to_string(),
        )];
        if self.config.family.protocol() == Protocol::AnthropicMessages {
            headers.push(("anthropic-version".to_string(), "2023-06-01".to_string()));
        }
        for (name, value) in &self.config.default_headers {
            upsert_header(&mut headers, name, value);
        }
        let auth_headers = self.auth.build_headers().await.map_err(|err| {
            ProviderFailure {
                kind: UpstreamErrorKind::AuthOauthExpired,
                status: None,
                upstream_code: None,
                message: err.to_string(),
            }
        })?;
        for (name, value) in &auth_headers {
            upsert_header(&mut headers, name, value);
        }
        Ok(headers)
    }

    fn decode_response(
        &self,
        response: OutboundResponse,
        glm_coding: bool,
    ) -> Result<ProviderResponse, ProviderFailure> {
        let status = response.status;
        // Never silently succeed on a non-2xx status.
        if !(200..300).contains(&status) {
            let body_text = match response.body {
                OutboundBody::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                OutboundBody::Stream(_) => String::new(),
            };
            let (message, upstream_code) = extract_error(&body_text);
            let kind = classify_status(status, self.auth.is_oauth(), &body_text);
            return Err(ProviderFailure {
                kind,
                status: Some(status),
                upstream_code,
                message,
            });
        }

        match response.body {
            OutboundBody::Stream(rx) => Ok(ProviderResponse::Stream { status, rx }),
            OutboundBody::Bytes(bytes) => {
                let mut value: Value =
                    serde_json::from_slice(&bytes).map_err(|err| ProviderFailure {
                        kind: UpstreamErrorKind::Internal,
                        status: Some(status),
                        upstream_code: None,
                        message: format!("upstream body is not json: {err}"),
                    })?;
                if glm_coding {
                    glm_coding_response(&mut value);
                }
                Ok(ProviderResponse::Json(value))
            }
        }
    }
}

fn upsert_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    let lower = name.to_ascii_lowercase();
    if let Some(slot) = headers.iter_mut().find(|(existing, _)| *existing == lower) {
        slot.1 = value.to_string();
    } else {
        headers.push((lower, value.to_string()));
    }
}

/// Pull the human message and vendor code out of an upstream error body.
fn extract_error(body: &str) -> (String, Option<String>) {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let error = value.get("error").unwrap_or(&value);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(body)
            .to_string();
        let code = error
            .get("code")
            .map(|code| match code {
                Value::String(code) => code.clone(),
                other => other.to_string(),
            })
            .or_else(|| {
                error
                    .get("type")
                    .and_then(Value::as_str)
                    .map(|t| t.to_string())
            });
        return (message, code);
    }
    let mut message = body.to_string();
    message.truncate(512);
    (message, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ApiKeyAuth;
    use crate::transport::TransportConfig;

    fn adapter(family: ProviderFamily, base_url: &str, endpoint: Option<&str>) -> ProviderAdapter {
        ProviderAdapter::new(
            AdapterConfig {
                provider_id: "p1".to_string(),
                family,
                base_url: base_url.to_string(),
                endpoint: endpoint.map(|endpoint| endpoint.to_string()),
                default_headers: Vec::new(),
                timeout: Duration::from_secs(300),
            },
            AuthProvider::ApiKey(ApiKeyAuth::bearer("k")),
            Arc::new(HttpTransport::new(TransportConfig::default())),
            None,
        )
    }

    #[test]
    fn v1_is_not_doubled() {
        let adapter = adapter(ProviderFamily::Openai, "https://api.openai.com/v1", None);
        assert_eq!(
            adapter.endpoint_url("gpt-4", false),
            "https://api.openai.com/v1/chat/completions"
        );
        let adapter = adapter_no_v1();
        assert_eq!(
            adapter.endpoint_url("gpt-4", false),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    fn adapter_no_v1() -> ProviderAdapter {
        adapter(ProviderFamily::Openai, "https://api.openai.com", None)
    }

    #[test]
    fn gemini_urls_carry_model_and_action() {
        let adapter = adapter(
            ProviderFamily::Gemini,
            "https://generativelanguage.googleapis.com",
            None,
        );
        assert_eq!(
            adapter.endpoint_url("gemini-pro", false),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent"
        );
        assert!(
            adapter
                .endpoint_url("gemini-pro", true)
                .ends_with(":streamGenerateContent?alt=sse")
        );
    }

    #[test]
    fn endpoint_override_wins() {
        let adapter = adapter(
            ProviderFamily::Glm,
            "https://open.bigmodel.cn/api/paas/v4",
            Some("/chat/completions"),
        );
        assert_eq!(
            adapter.endpoint_url("glm-4", false),
            "https://open.bigmodel.cn/api/paas/v4/chat/completions"
        );
    }

    #[test]
    fn error_bodies_are_unwrapped() {
        let (message, code) =
            extract_error(r#"{"error":{"message":"rate limited","code":"429_daily"}}"#);
        assert_eq!(message, "rate limited");
        assert_eq!(code.as_deref(), Some("429_daily"));
        let (message, code) = extract_error("upstream exploded");
        assert_eq!(message, "upstream exploded");
        assert!(code.is_none());
    }
}
