use polyroute_protocol::{as_object, get, get_array};
use serde_json::{Map, Value, json};

use crate::{CodecCtx, CodecError, finish_reason_from_stop};

/// Convert a complete anthropic message into an openai-chat response.
pub fn convert(payload: Value, ctx: &CodecCtx) -> Result<Value, CodecError> {
    as_object(&payload, "")?;

    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    for block in get_array(&payload, "content")? {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    texts.push(text.to_string());
                }
            }
            Some("tool_use") => {
                let input = block.get("input").cloned().unwrap_or(json!({}));
                let arguments =
                    serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string());
                tool_calls.push(json!({
                    "id": block.get("id").cloned().unwrap_or(json!("")),
                    "type": "function",
                    "function": {
                        "name": block.get("name").cloned().unwrap_or(json!("")),
                        "arguments": arguments,
                    }
                }));
            }
            _ => {}
        }
    }

    let mut message = Map::new();
    message.insert("role".to_string(), json!("assistant"));
    message.insert("content".to_string(), json!(texts.join("")));
    if !tool_calls.is_empty() {
        message.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }

    let finish_reason = get(&payload, "stop_reason")
        .and_then(Value::as_str)
        .map(finish_reason_from_stop)
        .unwrap_or("stop");

    let usage = get(&payload, "usage");
    let prompt = usage
        .and_then(|u| u.get("input_tokens"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let completion = usage
        .and_then(|u| u.get("output_tokens"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    Ok(json!({
        "id": payload.get("id").cloned().unwrap_or(json!(format!("chatcmpl_{}", ctx.request_id))),
        "object": "chat.completion",
        "created": ctx.unix_time,
        "model": payload.get("model").cloned().unwrap_or(json!("")),
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
    fn message_blocks_collapse_into_chat_choice() {
        let payload = json!({
            "id": "msg_1",
            "model": "claude-x",
            "content": [
                {"type": "text", "text": "use the tool"},
                {"type": "tool_use", "id": "tu_1", "name": "f", "input": {"a": 1}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 5, "output_tokens": 7}
        });
        let out = convert(payload, &CodecCtx::new("r", 1700)).unwrap();
        let message = &out["choices"][0]["message"];
        assert_eq!(message["content"], "use the tool");
        assert_eq!(message["tool_calls"][0]["function"]["arguments"], "{\"a\":1}");
        assert_eq!(out["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(out["usage"]["total_tokens"], 12);
        assert_eq!(out["created"], 1700);
    }
}
