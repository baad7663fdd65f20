//! Bidirectional protocol translation (the "LLM switch").
//!
//! Every codec converts between an entry protocol (what the client speaks)
//! and a provider protocol (what the upstream speaks). Payloads are
//! runtime-flexible `serde_json::Value`s; conversions read them through
//! fail-fast accessors. Gemini and cross pairs compose through the canonical
//! openai-chat shape rather than being written out pairwise.

mod anthropic2chat;
mod chat2anthropic;
mod chat2gemini;
mod chat2responses;
mod ctx;
mod identity;
mod responses2chat;
mod stream;

pub use ctx::CodecCtx;
pub use stream::{ClientEvent, StreamCodec, UpstreamEvent};

use polyroute_protocol::{Protocol, ShapeError};
use serde_json::Value;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("no codec for {entry:?} -> {provider:?}")]
    UnsupportedPair { entry: Protocol, provider: Protocol },
}

/// Translate a client request payload into the provider protocol's shape.
pub fn convert_request(
    entry: Protocol,
    provider: Protocol,
    payload: Value,
    ctx: &CodecCtx,
) -> Result<Value, CodecError> {
    // Normalize to canonical chat first, then (if needed) lift into the
    // provider dialect.
    let chat = match entry {
        Protocol::OpenaiChat => identity::normalize_chat_request(payload)?,
        Protocol::AnthropicMessages => anthropic2chat::request::convert(payload, ctx)?,
        Protocol::OpenaiResponses => responses2chat::request::convert(payload, ctx)?,
        Protocol::GeminiChat => {
            return Err(CodecError::UnsupportedPair { entry, provider });
        }
    };

    let out = match provider {
        Protocol::OpenaiChat => chat,
        Protocol::AnthropicMessages => chat2anthropic::request::convert(chat, ctx)?,
        Protocol::OpenaiResponses => chat2responses::request::convert(chat, ctx)?,
        Protocol::GeminiChat => chat2gemini::request::convert(chat, ctx)?,
    };
    Ok(out)
}

/// Translate a complete (non-streaming) provider response back into the
/// entry protocol's shape.
pub fn convert_response(
    entry: Protocol,
    provider: Protocol,
    payload: Value,
    ctx: &CodecCtx,
) -> Result<Value, CodecError> {
    let chat = match provider {
        Protocol::OpenaiChat => payload,
        Protocol::AnthropicMessages => chat2anthropic::response::convert(payload, ctx)?,
        Protocol::OpenaiResponses => chat2responses::response::convert(payload, ctx)?,
        Protocol::GeminiChat => chat2gemini::response::convert(payload, ctx)?,
    };

    let out = match entry {
        Protocol::OpenaiChat => chat,
        Protocol::AnthropicMessages => anthropic2chat::response::convert(chat, ctx)?,
        Protocol::OpenaiResponses => responses2chat::response::convert(chat, ctx)?,
        Protocol::GeminiChat => {
            return Err(CodecError::UnsupportedPair { entry, provider });
        }
    };
    Ok(out)
}

/// Map an openai-chat `finish_reason` to an anthropic `stop_reason`.
pub(crate) fn stop_reason_from_finish(finish: &str) -> &'static str {
    match finish {
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        _ => "end_turn",
    }
}

/// Map an anthropic `stop_reason` to an openai-chat `finish_reason`.
pub(crate) fn finish_reason_from_stop(stop: &str) -> &'static str {
    match stop {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}
