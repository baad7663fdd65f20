use polyroute_protocol::{as_object, get, get_array};
use serde_json::{Value, json};

use crate::{CodecCtx, CodecError, stop_reason_from_finish};

/// Convert a complete openai-chat response into an anthropic message.
pub fn convert(payload: Value, ctx: &CodecCtx) -> Result<Value, CodecError> {
    as_object(&payload, "")?;
    let choices = get_array(&payload, "choices")?;
    let choice = choices.first().cloned().unwrap_or(json!({}));
    let message = choice.get("message").cloned().unwrap_or(json!({}));

    let mut content: Vec<Value> = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str)
        && !text.is_empty()
    {
        content.push(json!({"type": "text", "text": text}));
    }
    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in tool_calls {
            let function = call.get("function").cloned().unwrap_or(json!({}));
            let input = match function.get("arguments") {
                Some(Value::String(raw)) => {
                    serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
                }
                Some(other) => other.clone(),
                None => json!({}),
            };
            content.push(json!({
                "type": "tool_use",
                "id": call.get("id").cloned().unwrap_or(json!("")),
                "name": function.get("name").cloned().unwrap_or(json!("")),
                "input": input,
            }));
        }
    }

    let stop_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(stop_reason_from_finish)
        .unwrap_or("end_turn");

    let usage = get(&payload, "usage");
    let input_tokens = usage
        .and_then(|u| u.get("prompt_tokens"))
        .cloned()
        .unwrap_or(json!(0));
    let output_tokens = usage
        .and_then(|u| u.get("completion_tokens"))
        .cloned()
        .unwrap_or(json!(0));

    let id = payload
        .get("id")
        .and_then(Value::as_str)
        .map(|id| id.to_string())
        .unwrap_or_else(|| format!("msg_{}", ctx.request_id));

    Ok(json!({
        "id": id,
        "type": "message",
        "role": "assistant",
        "model": payload.get("model").cloned().unwrap_or(json!("")),
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens},
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_response_maps_to_message() {
        let payload = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4",
            "choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2}
        });
        let out = convert(payload, &CodecCtx::new("req_t", 0)).unwrap();
        assert_eq!(out["type"], "message");
        assert_eq!(out["content"], json!([{"type": "text", "text": "hello"}]));
        assert_eq!(out["stop_reason"], "end_turn");
        assert_eq!(out["usage"]["input_tokens"], 3);
    }

    #[test]
    fn tool_calls_become_tool_use_blocks() {
        let payload = json!({
            "id": "chatcmpl-2",
            "model": "gpt-4",
            "choices": [{
                "message": {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "c1", "type": "function", "function": {"name": "f", "arguments": "{\"a\":1}"}}
                ]},
                "finish_reason": "tool_calls"
            }]
        });
        let out = convert(payload, &CodecCtx::new("req_t", 0)).unwrap();
        assert_eq!(out["stop_reason"], "tool_use");
        assert_eq!(out["content"][0]["type"], "tool_use");
        assert_eq!(out["content"][0]["input"]["a"], 1);
    }
}
