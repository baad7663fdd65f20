use polyroute_protocol::{as_object, get, get_array};
use serde_json::{Value, json};

use crate::{CodecCtx, CodecError};

/// Convert a complete openai-chat response into an openai-responses object.
pub fn convert(payload: Value, ctx: &CodecCtx) -> Result<Value, CodecError> {
    as_object(&payload, "")?;
    let choices = get_array(&payload, "choices")?;
    let choice = choices.first().cloned().unwrap_or(json!({}));
    let message = choice.get("message").cloned().unwrap_or(json!({}));

    let response_id = payload
        .get("id")
        .and_then(Value::as_str)
        .map(|id| id.to_string())
        .unwrap_or_else(|| format!("resp_{}", ctx.request_id));

    let mut output: Vec<Value> = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str)
        && !text.is_empty()
    {
        output.push(json!({
            "type": "message",
            "id": format!("msg_{response_id}"),
            "role": "assistant",
            "status": "completed",
            "content": [{"type": "output_text", "text": text, "annotations": []}],
        }));
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for (position, call) in calls.iter().enumerate() {
            let function = call.get("function").cloned().unwrap_or(json!({}));
            output.push(json!({
                "type": "function_call",
                "id": format!("fc_{response_id}_{position}"),
                "call_id": call.get("id").cloned().unwrap_or(json!("")),
                "name": function.get("name").cloned().unwrap_or(json!("")),
                "arguments": function.get("arguments").cloned().unwrap_or(json!("{}")),
                "status": "completed",
            }));
        }
    }

    let usage = get(&payload, "usage");
    let input_tokens = usage
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let output_tokens = usage
        .and_then(|u| u.get("completion_tokens"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let incomplete = choice.get("finish_reason").and_then(Value::as_str) == Some("length");

    Ok(json!({
        "id": response_id,
        "object": "response",
        "created_at": payload.get("created").cloned().unwrap_or(json!(ctx.unix_time)),
        "status": if incomplete { "incomplete" } else { "completed" },
        "model": payload.get("model").cloned().unwrap_or(json!("")),
        "output": output,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_choice_becomes_output_items() {
        let payload = json!({
            "id": "chatcmpl-9",
            "created": 1700,
            "model": "gpt-4.1",
            "choices": [{
                "message": {"role": "assistant", "content": "hello", "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "f", "arguments": "{}"}}
                ]},
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2}
        });
        let out = convert(payload, &CodecCtx::new("r", 0)).unwrap();
        assert_eq!(out["object"], "response");
        assert_eq!(out["status"], "completed");
        assert_eq!(out["output"][0]["content"][0]["text"], "hello");
        assert_eq!(out["output"][1]["type"], "function_call");
        assert_eq!(out["output"][1]["call_id"], "call_1");
        assert_eq!(out["usage"]["total_tokens"], 3);
    }
}
