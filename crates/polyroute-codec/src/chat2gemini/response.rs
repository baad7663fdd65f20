use polyroute_protocol::{as_object, get};
use serde_json::{Map, Value, json};

use crate::{CodecCtx, CodecError};

/// Convert a complete gemini generateContent response into an openai-chat
/// response.
pub fn convert(payload: Value, ctx: &CodecCtx) -> Result<Value, CodecError> {
    as_object(&payload, "")?;
    let candidate = get(&payload, "candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .cloned()
        .unwrap_or(json!({}));

    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    if let Some(parts) = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
    {
        for (position, part) in parts.iter().enumerate() {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                texts.push(text.to_string());
            }
            if let Some(call) = part.get("functionCall") {
                let args = call.get("args").cloned().unwrap_or(json!({}));
                let arguments =
                    serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string());
                tool_calls.push(json!({
                    "id": format!("call_{}_{position}", ctx.request_id),
                    "type": "function",
                    "function": {
                        "name": call.get("name").cloned().unwrap_or(json!("")),
                        "arguments": arguments,
                    }
                }));
            }
        }
    }

    let mut message = Map::new();
    message.insert("role".to_string(), json!("assistant"));
    message.insert("content".to_string(), json!(texts.join("")));
    let finish_reason = if !tool_calls.is_empty() {
        message.insert("tool_calls".to_string(), Value::Array(tool_calls));
        "tool_calls"
    } else {
        match candidate.get("finishReason").and_then(Value::as_str) {
            Some("MAX_TOKENS") => "length",
            Some("SAFETY") | Some("RECITATION") => "content_filter",
            _ => "stop",
        }
    };

    let usage = get(&payload, "usageMetadata");
    let prompt = usage
        .and_then(|u| u.get("promptTokenCount"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let completion = usage
        .and_then(|u| u.get("candidatesTokenCount"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    Ok(json!({
        "id": format!("chatcmpl_{}", ctx.request_id),
        "object": "chat.completion",
        "created": ctx.unix_time,
        "model": payload.get("modelVersion").cloned().unwrap_or(json!("")),
        "choices": [{
            "index": 0,
            "message": Value::Object(message),
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_collapse_into_chat_choice() {
        let payload = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "hi"},
                    {"functionCall": {"name": "f", "args": {"a": 1}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 6}
        });
        let out = convert(payload, &CodecCtx::new("r1", 1700)).unwrap();
        let message = &out["choices"][0]["message"];
        assert_eq!(message["content"], "hi");
        assert_eq!(message["tool_calls"][0]["function"]["arguments"], "{\"a\":1}");
        assert_eq!(out["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(out["usage"]["total_tokens"], 10);
    }

    #[test]
    fn max_tokens_maps_to_length() {
        let payload = json!({
            "candidates": [{"content": {"parts": [{"text": "x"}]}, "finishReason": "MAX_TOKENS"}]
        });
        let out = convert(payload, &CodecCtx::new("r", 0)).unwrap();
        assert_eq!(out["choices"][0]["finish_reason"], "length");
    }
}
