use polyroute_codec::{CodecCtx, convert_request, convert_response};
use polyroute_protocol::Protocol;
use serde_json::json;

fn ctx() -> CodecCtx {
    CodecCtx::new("req_rt", 1_700_000_000)
}

// Anthropic entry over an openai provider: the documented fields (text
// content, tool names, model id) survive the there-and-back conversion.
#[test]
fn anthropic_over_chat_preserves_canonical_fields() {
    let request = json!({
        "model": "any",
        "system": "be brief",
        "messages": [
            {"role": "user", "content": [{"type": "text", "text": "hi"}]}
        ],
        "max_tokens": 10
    });
    let outbound = convert_request(
        Protocol::AnthropicMessages,
        Protocol::OpenaiChat,
        request,
        &ctx(),
    )
    .unwrap();
    assert_eq!(
        outbound["messages"],
        json!([
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": "hi"}
        ])
    );
    assert_eq!(outbound["max_tokens"], 10);

    let upstream_response = json!({
        "id": "chatcmpl-1",
        "model": "gpt-4",
        "choices": [{
            "message": {"role": "assistant", "content": "hello"},
            "finish_reason": "stop"
        }]
    });
    let client_response = convert_response(
        Protocol::AnthropicMessages,
        Protocol::OpenaiChat,
        upstream_response,
        &ctx(),
    )
    .unwrap();
    assert_eq!(client_response["type"], "message");
    assert_eq!(client_response["role"], "assistant");
    assert_eq!(
        client_response["content"],
        json!([{"type": "text", "text": "hello"}])
    );
    assert_eq!(client_response["stop_reason"], "end_turn");
}

#[test]
fn responses_over_chat_round_trips_tool_names() {
    let request = json!({
        "model": "gpt-4.1",
        "input": [{"type": "message", "role": "user", "content": "call it"}],
        "tools": [{"type": "function", "name": "lookup", "parameters": {"type": "object"}}]
    });
    let outbound = convert_request(
        Protocol::OpenaiResponses,
        Protocol::OpenaiChat,
        request,
        &ctx(),
    )
    .unwrap();
    assert_eq!(outbound["model"], "gpt-4.1");
    assert_eq!(outbound["tools"][0]["function"]["name"], "lookup");

    let upstream_response = json!({
        "id": "chatcmpl-2",
        "model": "gpt-4.1",
        "choices": [{
            "message": {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_1", "type": "function",
                 "function": {"name": "lookup", "arguments": "{\"q\":\"x\"}"}}
            ]},
            "finish_reason": "tool_calls"
        }]
    });
    let client_response = convert_response(
        Protocol::OpenaiResponses,
        Protocol::OpenaiChat,
        upstream_response,
        &ctx(),
    )
    .unwrap();
    assert_eq!(client_response["object"], "response");
    assert_eq!(client_response["model"], "gpt-4.1");
    assert_eq!(client_response["output"][0]["name"], "lookup");
    assert_eq!(client_response["output"][0]["call_id"], "call_1");
}

// Cross pair composed through canonical chat: anthropic entry over a gemini
// provider.
#[test]
fn anthropic_over_gemini_composes() {
    let request = json!({
        "model": "gemini-pro",
        "messages": [{"role": "user", "content": "ping"}],
        "max_tokens": 4
    });
    let outbound = convert_request(
        Protocol::AnthropicMessages,
        Protocol::GeminiChat,
        request,
        &ctx(),
    )
    .unwrap();
    assert_eq!(outbound["contents"][0]["parts"][0]["text"], "ping");
    assert_eq!(outbound["generationConfig"]["maxOutputTokens"], 4);

    let upstream_response = json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": "pong"}]},
            "finishReason": "STOP"
        }]
    });
    let client_response = convert_response(
        Protocol::AnthropicMessages,
        Protocol::GeminiChat,
        upstream_response,
        &ctx(),
    )
    .unwrap();
    assert_eq!(
        client_response["content"],
        json!([{"type": "text", "text": "pong"}])
    );
    assert_eq!(client_response["stop_reason"], "end_turn");
}

#[test]
fn gemini_entry_has_no_codec() {
    let err = convert_request(
        Protocol::GeminiChat,
        Protocol::OpenaiChat,
        json!({}),
        &ctx(),
    );
    assert!(err.is_err());
}
