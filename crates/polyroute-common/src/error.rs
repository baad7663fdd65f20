use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Coarse failure taxonomy used for propagation decisions and log grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Routing,
    Auth,
    RateLimit,
    UpstreamClient,
    UpstreamServer,
    Network,
    ProtocolDrift,
    StreamAbort,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Routing => "routing",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::UpstreamClient => "upstream_client",
            ErrorKind::UpstreamServer => "upstream_server",
            ErrorKind::Network => "network",
            ErrorKind::ProtocolDrift => "protocol_drift",
            ErrorKind::StreamAbort => "stream_abort",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Stable error `type` string derived from an HTTP status, surfaced to clients.
pub fn error_type_for_status(status: u16) -> &'static str {
    match status {
        400 => "bad_request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not_found",
        408 => "request_timeout",
        409 => "conflict",
        422 => "unprocessable_entity",
        429 => "rate_limit_exceeded",
        500..=599 => "server_error",
        _ => "internal_error",
    }
}

/// Error returned to the client; carries the upstream status where one exists.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ProxyError {
    pub status: u16,
    pub kind: ErrorKind,
    /// Stable grouping code (e.g. `ERR_NO_HEALTHY_TARGET`).
    pub code: String,
    pub message: String,
}

impl ProxyError {
    pub fn new(
        status: u16,
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(400, ErrorKind::Validation, "ERR_INVALID_REQUEST", message)
    }

    pub fn unsupported_endpoint(path: impl Into<String>) -> Self {
        Self::new(
            404,
            ErrorKind::Routing,
            "ERR_UNSUPPORTED_ENDPOINT",
            format!("unsupported endpoint: {}", path.into()),
        )
    }

    pub fn no_healthy_target(category: impl Into<String>) -> Self {
        Self::new(
            503,
            ErrorKind::Routing,
            "ERR_NO_HEALTHY_TARGET",
            format!("no healthy target for category {}", category.into()),
        )
    }

    pub fn auth(status: u16, message: impl Into<String>) -> Self {
        Self::new(status, ErrorKind::Auth, "ERR_UPSTREAM_AUTH", message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(429, ErrorKind::RateLimit, "ERR_RATE_LIMITED", message)
    }

    pub fn protocol_drift(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(502, ErrorKind::ProtocolDrift, code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, ErrorKind::Internal, "ERR_INTERNAL", message)
    }

    pub fn upstream(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        let kind = match status {
            429 => ErrorKind::RateLimit,
            401 | 402 | 403 => ErrorKind::Auth,
            400..=499 => ErrorKind::UpstreamClient,
            _ => ErrorKind::UpstreamServer,
        };
        Self::new(status, kind, code, message)
    }

    pub fn error_type(&self) -> &'static str {
        error_type_for_status(self.status)
    }

    /// Client-facing JSON body. The `internal` kind never leaks its message.
    pub fn to_body(&self, request_id: &str) -> Value {
        let message = if self.kind == ErrorKind::Internal {
            "internal server error"
        } else {
            self.message.as_str()
        };
        json!({
            "error": {
                "message": message,
                "type": self.error_type(),
                "code": self.code,
                "param": null,
                "details": { "requestId": request_id },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_to_stable_type() {
        assert_eq!(error_type_for_status(429), "rate_limit_exceeded");
        assert_eq!(error_type_for_status(422), "unprocessable_entity");
        assert_eq!(error_type_for_status(524), "server_error");
        assert_eq!(error_type_for_status(301), "internal_error");
    }

    #[test]
    fn internal_message_is_not_leaked() {
        let err = ProxyError::internal("lock poisoned in pool");
        let body = err.to_body("req_1");
        assert_eq!(body["error"]["message"], "internal server error");
        assert_eq!(body["error"]["details"]["requestId"], "req_1");
    }

    #[test]
    fn body_shape_is_stable() {
        let err = ProxyError::no_healthy_target("coding");
        let body = err.to_body("req_2");
        assert_eq!(body["error"]["type"], "server_error");
        assert_eq!(body["error"]["code"], "ERR_NO_HEALTHY_TARGET");
        assert!(body["error"]["param"].is_null());
    }
}
