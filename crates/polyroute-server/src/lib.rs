//! HTTP frontend: entry endpoints, the request-id middleware, JSON error
//! bodies, and SSE response plumbing.

use std::convert::Infallible;

use axum::Router;
use axum::body::Body;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

use polyroute_common::{ProxyError, RequestId};
use polyroute_core::{ProxyCall, ProxyReply, ProxyService};
use polyroute_protocol::{EntryEndpoint, Protocol};

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct ServerState {
    service: ProxyService,
}

/// Build the client-facing router.
pub fn proxy_router(service: ProxyService) -> Router {
    let state = ServerState { service };
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(completions))
        .route("/v1/messages", post(messages))
        .route("/v1/responses", post(responses))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/models", get(models_list))
        .route("/v1/models/{*model}", get(models_get))
        .route("/healthz", get(healthz))
        .fallback(unknown_endpoint)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

async fn unknown_endpoint(req: axum::http::Request<Body>) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .cloned()
        .unwrap_or_else(RequestId::generate);
    error_response(
        &ProxyError::unsupported_endpoint(req.uri().path()),
        &request_id,
    )
}

/// Every response carries `x-request-id`, including errors produced deeper
/// in the stack.
async fn request_id_middleware(mut req: axum::http::Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(RequestId::from_string)
        .unwrap_or_else(RequestId::generate);
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

async fn chat_completions(
    State(state): State<ServerState>,
    req: axum::http::Request<Body>,
) -> Response {
    dispatch(state, EntryEndpoint::ChatCompletions, req).await
}

async fn completions(State(state): State<ServerState>, req: axum::http::Request<Body>) -> Response {
    dispatch(state, EntryEndpoint::Completions, req).await
}

async fn messages(State(state): State<ServerState>, req: axum::http::Request<Body>) -> Response {
    dispatch(state, EntryEndpoint::Messages, req).await
}

async fn responses(State(state): State<ServerState>, req: axum::http::Request<Body>) -> Response {
    dispatch(state, EntryEndpoint::Responses, req).await
}

async fn embeddings(State(state): State<ServerState>, req: axum::http::Request<Body>) -> Response {
    dispatch(state, EntryEndpoint::Embeddings, req).await
}

async fn dispatch(
    state: ServerState,
    endpoint: EntryEndpoint,
    req: axum::http::Request<Body>,
) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .cloned()
        .unwrap_or_else(RequestId::generate);
    let session_id = session_id_from(req.headers());

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(body) => body,
        Err(err) => {
            return error_response(
                &ProxyError::validation(format!("body read failed: {err}")),
                &request_id,
            );
        }
    };
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            return error_response(
                &ProxyError::validation(format!("invalid json: {err}")),
                &request_id,
            );
        }
    };

    tracing::debug!(
        request_id = %request_id,
        endpoint = endpoint.as_str(),
        "request accepted"
    );

    let reply = state
        .service
        .handle(ProxyCall {
            endpoint,
            payload,
            session_id,
            request_id: request_id.clone(),
        })
        .await;

    match reply {
        Ok(ProxyReply::Json(value)) => json_response(StatusCode::OK, &value),
        Ok(ProxyReply::Stream { entry, rx }) => sse_response(entry, rx),
        Err(error) => error_response(&error, &request_id),
    }
}

async fn models_list(State(state): State<ServerState>) -> Response {
    json_response(StatusCode::OK, &state.service.models())
}

async fn models_get(
    State(state): State<ServerState>,
    Path(model): Path<String>,
    Extension(request_id): Extension<RequestId>,
) -> Response {
    match state.service.model(&model) {
        Some(value) => json_response(StatusCode::OK, &value),
        None => {
            let error = ProxyError::new(
                404,
                polyroute_common::ErrorKind::Validation,
                "ERR_MODEL_NOT_FOUND",
                format!("model {model} not found"),
            );
            error_response(&error, &request_id)
        }
    }
}

async fn healthz(State(state): State<ServerState>) -> Response {
    json_response(StatusCode::OK, &state.service.health_report().await)
}

fn session_id_from(headers: &HeaderMap) -> Option<String> {
    for name in ["x-session-id", "session_id", "session-id"] {
        if let Some(value) = headers.get(name).and_then(|value| value.to_str().ok())
            && !value.is_empty()
        {
            return Some(value.to_string());
        }
    }
    None
}

fn json_response(status: StatusCode, value: &Value) -> Response {
    let body = value.to_string();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(error: &ProxyError, request_id: &RequestId) -> Response {
    let status =
        StatusCode::from_u16(error.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &error.to_body(request_id.as_str()))
}

const SSE_HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);
const SSE_HEARTBEAT_FRAME: &[u8] = b": keep-alive\n\n";

fn sse_response(entry: Protocol, rx: tokio::sync::mpsc::Receiver<Bytes>) -> Response {
    let _ = entry;
    let stream = ReceiverStream::new(with_heartbeat(rx)).map(Ok::<_, Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(HeaderName::from_static("x-accel-buffering"), "no")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Comment frames keep intermediaries from timing out quiet streams.
fn with_heartbeat(
    mut upstream: tokio::sync::mpsc::Receiver<Bytes>,
) -> tokio::sync::mpsc::Receiver<Bytes> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SSE_HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                maybe_chunk = upstream.recv() => {
                    let Some(chunk) = maybe_chunk else { break };
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if tx.send(Bytes::from_static(SSE_HEARTBEAT_FRAME)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_headers_are_probed_in_order() {
        let mut headers = HeaderMap::new();
        headers.insert("session_id", HeaderValue::from_static("s2"));
        headers.insert("x-session-id", HeaderValue::from_static("s1"));
        assert_eq!(session_id_from(&headers), Some("s1".to_string()));
        assert_eq!(session_id_from(&HeaderMap::new()), None);
    }

    #[test]
    fn error_responses_use_the_stable_shape() {
        let error = ProxyError::rate_limited("slow down");
        let response = error_response(&error, &RequestId::from_string("req_x"));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
