use polyroute_protocol::{as_object, get, get_array};
use serde_json::{Map, Value, json};

use crate::{CodecCtx, CodecError};

/// Convert a complete openai-responses object into an openai-chat response.
pub fn convert(payload: Value, ctx: &CodecCtx) -> Result<Value, CodecError> {
    as_object(&payload, "")?;

    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for item in get_array(&payload, "output")? {
        match item.get("type").and_then(Value::as_str) {
            Some("message") => {
                if let Some(parts) = item.get("content").and_then(Value::as_array) {
                    for part in parts {
                        if part.get("type").and_then(Value::as_str) == Some("output_text")
                            && let Some(text) = part.get("text").and_then(Value::as_str)
                        {
                            texts.push(text.to_string());
                        }
                    }
                }
            }
            Some("function_call") => {
                tool_calls.push(json!({
                    "id": item.get("call_id").cloned().unwrap_or(json!("")),
                    "type": "function",
                    "function": {
                        "name": item.get("name").cloned().unwrap_or(json!("")),
                        "arguments": item.get("arguments").cloned().unwrap_or(json!("{}")),
                    }
                }));
            }
            _ => {}
        }
    }

    let mut message = Map::new();
    message.insert("role".to_string(), json!("assistant"));
    message.insert("content".to_string(), json!(texts.join("")));
    let finish_reason = if !tool_calls.is_empty() {
        message.insert("tool_calls".to_string(), Value::Array(tool_calls));
        "tool_calls"
    } else if get(&payload, "status").and_then(Value::as_str) == Some("incomplete") {
        "length"
    } else {
        "stop"
    };

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
        "created": payload.get("created_at").cloned().unwrap_or(json!(ctx.unix_time)),
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
    fn output_items_collapse_into_chat_choice() {
        let payload = json!({
            "id": "resp_1",
            "created_at": 1700,
            "status": "completed",
            "model": "gpt-4.1",
            "output": [
                {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "hello"}
                ]},
                {"type": "function_call", "call_id": "fc_1", "name": "f", "arguments": "{\"a\":1}"}
            ],
            "usage": {"input_tokens": 2, "output_tokens": 3}
        });
        let out = convert(payload, &CodecCtx::new("r", 0)).unwrap();
        assert_eq!(out["created"], 1700);
        assert_eq!(out["choices"][0]["message"]["content"], "hello");
        assert_eq!(
            out["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"],
            "{\"a\":1}"
        );
        assert_eq!(out["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(out["usage"]["total_tokens"], 5);
    }

    #[test]
    fn incomplete_status_maps_to_length() {
        let payload = json!({"id": "r", "status": "incomplete", "model": "m", "output": []});
        let out = convert(payload, &CodecCtx::new("r", 0)).unwrap();
        assert_eq!(out["choices"][0]["finish_reason"], "length");
    }
}
