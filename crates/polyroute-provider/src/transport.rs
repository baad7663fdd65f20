use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Transport-level failure (no HTTP response reached us).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

impl TransportErrorKind {
    /// Connection-level failures are worth one immediate retry; timeouts are
    /// not (the provider already had its full window).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportErrorKind::Connect | TransportErrorKind::Dns | TransportErrorKind::Tls
        )
    }
}

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub timeout: Duration,
    pub want_stream: bool,
}

#[derive(Debug)]
pub enum OutboundBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

#[derive(Debug)]
pub struct OutboundResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: OutboundBody,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub stream_idle_timeout: Duration,
    /// How long a streaming request may take to produce response headers.
    pub headers_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            stream_idle_timeout: Duration::from_secs(90),
            headers_timeout: Duration::from_secs(30),
        }
    }
}

/// Outbound HTTP client shared by every provider adapter. One process-wide
/// wreq client; per-request timeouts come from the provider descriptor.
pub struct HttpTransport {
    config: TransportConfig,
}

static SHARED_CLIENT: OnceLock<wreq::Client> = OnceLock::new();

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    fn client(&self) -> Result<&'static wreq::Client, TransportError> {
        if let Some(client) = SHARED_CLIENT.get() {
            return Ok(client);
        }
        let client = wreq::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .build()
            .map_err(|err| TransportError {
                kind: TransportErrorKind::Other,
                message: err.to_string(),
            })?;
        let _ = SHARED_CLIENT.set(client);
        Ok(SHARED_CLIENT.get().expect("shared client set above"))
    }

    pub async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(&request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.kind.is_transient() && attempt == 0 && !request.want_stream => {
                    tracing::debug!(
                        url = %request.url,
                        error = %err,
                        "transient transport failure, retrying once"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(
        &self,
        request: &OutboundRequest,
    ) -> Result<OutboundResponse, TransportError> {
        let client = self.client()?;
        let method = wreq::Method::from_bytes(request.method.as_bytes()).map_err(|err| {
            TransportError {
                kind: TransportErrorKind::Other,
                message: err.to_string(),
            }
        })?;
        let mut builder = client.request(method, &request.url);
        if !request.want_stream {
            // Full-request deadline; streaming bodies are bounded by the
            // idle timeout instead.
            builder = builder.timeout(request.timeout);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = if request.want_stream {
            tokio::time::timeout(self.config.headers_timeout, builder.send())
                .await
                .map_err(|_| TransportError {
                    kind: TransportErrorKind::Timeout,
                    message: "timed out waiting for response headers".to_string(),
                })?
                .map_err(map_wreq_error)?
        } else {
            builder.send().await.map_err(map_wreq_error)?
        };
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let success = (200..300).contains(&status);
        if !success || !request.want_stream {
            let body = response.bytes().await.map_err(map_wreq_error)?;
            return Ok(OutboundResponse {
                status,
                headers,
                body: OutboundBody::Bytes(body),
            });
        }

        // Streaming: hand chunks over a channel; the reader enforces its own
        // idle timeout on top of this one.
        let idle = self.config.stream_idle_timeout;
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(idle, stream.next()).await;
                let Ok(item) = next else { break };
                let Some(item) = item else { break };
                let Ok(chunk) = item else { break };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        Ok(OutboundResponse {
            status,
            headers,
            body: OutboundBody::Stream(rx),
        })
    }
}

fn map_wreq_error(err: wreq::Error) -> TransportError {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    let kind = if err.is_timeout() {
        if lower.contains("read") || lower.contains("idle") {
            TransportErrorKind::ReadTimeout
        } else {
            TransportErrorKind::Timeout
        }
    } else if err.is_connect() {
        if lower.contains("dns") || lower.contains("resolve") {
            TransportErrorKind::Dns
        } else if lower.contains("tls") || lower.contains("ssl") {
            TransportErrorKind::Tls
        } else {
            TransportErrorKind::Connect
        }
    } else if lower.contains("tls") || lower.contains("ssl") {
        TransportErrorKind::Tls
    } else {
        TransportErrorKind::Other
    };
    TransportError { kind, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_failures_are_transient() {
        assert!(TransportErrorKind::Connect.is_transient());
        assert!(TransportErrorKind::Dns.is_transient());
        assert!(!TransportErrorKind::Timeout.is_transient());
        assert!(!TransportErrorKind::ReadTimeout.is_transient());
        assert!(!TransportErrorKind::Other.is_transient());
    }
}
