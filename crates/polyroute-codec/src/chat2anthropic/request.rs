use polyroute_protocol::{as_object, get, get_array};
use serde_json::{Map, Value, json};

use crate::{CodecCtx, CodecError};

/// Anthropic requires max_tokens; chat requests frequently omit it.
const DEFAULT_MAX_TOKENS: i64 = 4096;

/// Convert an openai-chat request into an anthropic create-message request.
pub fn convert(payload: Value, _ctx: &CodecCtx) -> Result<Value, CodecError> {
    as_object(&payload, "")?;

    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<Value> = Vec::new();

    for message in get_array(&payload, "messages")? {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
        match role {
            "system" | "developer" => {
                if let Some(text) = content_text(message) {
                    system_parts.push(text);
                }
            }
            "assistant" => messages.push(map_assistant(message)),
            "tool" => messages.push(map_tool_result(message)),
            _ => {
                let text = content_text(message).unwrap_or_default();
                messages.push(json!({"role": "user", "content": text}));
            }
        }
    }

    let mut out = Map::new();
    out.insert(
        "model".to_string(),
        get(&payload, "model").cloned().unwrap_or(json!("")),
    );
    if !system_parts.is_empty() {
        out.insert("system".to_string(), json!(system_parts.join("\n")));
    }
    out.insert("messages".to_string(), Value::Array(messages));

    let max_tokens = get(&payload, "max_tokens")
        .or_else(|| get(&payload, "max_completion_tokens"))
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_MAX_TOKENS);
    out.insert("max_tokens".to_string(), json!(max_tokens));

    for key in ["temperature", "top_p", "stream"] {
        if let Some(value) = get(&payload, key) {
            out.insert(key.to_string(), value.clone());
        }
    }
    if let Some(stop) = get(&payload, "stop") {
        let sequences = match stop {
            Value::String(s) => json!([s]),
            other => other.clone(),
        };
        out.insert("stop_sequences".to_string(), sequences);
    }

    if let Some(tools) = get(&payload, "tools").and_then(Value::as_array) {
        let mapped: Vec<Value> = tools.iter().filter_map(map_tool).collect();
        if !mapped.is_empty() {
            out.insert("tools".to_string(), Value::Array(mapped));
        }
    }
    if let Some(choice) = get(&payload, "tool_choice")
        && let Some(mapped) = map_tool_choice(choice)
    {
        out.insert("tool_choice".to_string(), mapped);
    }

    Ok(Value::Object(out))
}

fn content_text(message: &Value) -> Option<String> {
    match message.get("content") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Array(parts)) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            Some(texts.join("\n"))
        }
        _ => None,
    }
}

fn map_assistant(message: &Value) -> Value {
    let mut blocks: Vec<Value> = Vec::new();
    if let Some(text) = content_text(message)
        && !text.is_empty()
    {
        blocks.push(json!({"type": "text", "text": text}));
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call.get("function").cloned().unwrap_or(json!({}));
            let input = match function.get("arguments") {
                Some(Value::String(raw)) => {
                    serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
                }
                Some(other) => other.clone(),
                None => json!({}),
            };
            blocks.push(json!({
                "type": "tool_use",
                "id": call.get("id").cloned().unwrap_or(json!("")),
                "name": function.get("name").cloned().unwrap_or(json!("")),
                "input": input,
            }));
        }
    }
    json!({"role": "assistant", "content": blocks})
}

fn map_tool_result(message: &Value) -> Value {
    json!({
        "role": "user",
        "content": [{
            "type": "tool_result",
            "tool_use_id": message.get("tool_call_id").cloned().unwrap_or(json!("")),
            "content": content_text(message).unwrap_or_default(),
        }]
    })
}

fn map_tool(tool: &Value) -> Option<Value> {
    let function = tool.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?;
    let mut out = Map::new();
    out.insert("name".to_string(), json!(name));
    if let Some(description) = function.get("description") {
        out.insert("description".to_string(), description.clone());
    }
    out.insert(
        "input_schema".to_string(),
        function.get("parameters").cloned().unwrap_or(json!({})),
    );
    Some(Value::Object(out))
}

fn map_tool_choice(choice: &Value) -> Option<Value> {
    match choice {
        Value::String(mode) => match mode.as_str() {
            "auto" => Some(json!({"type": "auto"})),
            "required" => Some(json!({"type": "any"})),
            // "none" has no anthropic equivalent; omit tool_choice entirely
            _ => None,
        },
        Value::Object(_) => {
            let name = choice
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)?;
            Some(json!({"type": "tool", "name": name}))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_merge_and_max_tokens_defaults() {
        let payload = json!({
            "model": "claude-x",
            "messages": [
                {"role": "system", "content": "a"},
                {"role": "system", "content": "b"},
                {"role": "user", "content": "hi"}
            ]
        });
        let out = convert(payload, &CodecCtx::new("r", 0)).unwrap();
        assert_eq!(out["system"], "a\nb");
        assert_eq!(out["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(out["messages"][0]["content"], "hi");
    }

    #[test]
    fn tool_round_trip_shapes() {
        let payload = json!({
            "model": "m",
            "messages": [
                {"role": "assistant", "tool_calls": [
                    {"id": "c1", "type": "function", "function": {"name": "f", "arguments": "{\"x\":2}"}}
                ]},
                {"role": "tool", "tool_call_id": "c1", "content": "ok"}
            ],
            "tools": [{"type": "function", "function": {"name": "f", "parameters": {"type": "object"}}}],
            "tool_choice": "required"
        });
        let out = convert(payload, &CodecCtx::new("r", 0)).unwrap();
        assert_eq!(out["messages"][0]["content"][0]["type"], "tool_use");
        assert_eq!(out["messages"][0]["content"][0]["input"]["x"], 2);
        assert_eq!(out["messages"][1]["content"][0]["tool_use_id"], "c1");
        assert_eq!(out["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(out["tool_choice"]["type"], "any");
    }
}
