use polyroute_protocol::{as_object, get, get_array, get_str};
use serde_json::{Map, Value, json};

use crate::{CodecCtx, CodecError};

/// Convert an anthropic create-message request into an openai-chat request.
pub fn convert(payload: Value, _ctx: &CodecCtx) -> Result<Value, CodecError> {
    let body = as_object(&payload, "")?;

    let mut messages: Vec<Value> = Vec::new();
    if let Some(system) = body.get("system")
        && let Some(text) = system_text(system)
    {
        messages.push(json!({"role": "system", "content": text}));
    }

    for message in get_array(&payload, "messages")? {
        let role = get_str(message, "role")?;
        match role {
            "assistant" => messages.extend(map_assistant(message)?),
            _ => messages.extend(map_user(message)?),
        }
    }

    let mut out = Map::new();
    out.insert("model".to_string(), json!(get_str(&payload, "model")?));
    out.insert("messages".to_string(), Value::Array(messages));

    if let Some(max_tokens) = get(&payload, "max_tokens").and_then(Value::as_i64) {
        out.insert("max_tokens".to_string(), json!(max_tokens));
    }
    for key in ["temperature", "top_p", "stream"] {
        if let Some(value) = get(&payload, key) {
            out.insert(key.to_string(), value.clone());
        }
    }
    if let Some(stops) = get(&payload, "stop_sequences") {
        out.insert("stop".to_string(), stops.clone());
    }

    if let Some(tools) = get(&payload, "tools").and_then(Value::as_array) {
        let mapped: Vec<Value> = tools.iter().filter_map(map_tool).collect();
        if !mapped.is_empty() {
            out.insert("tools".to_string(), Value::Array(mapped));
        }
    }
    if let Some(choice) = get(&payload, "tool_choice") {
        if let Some(mapped) = map_tool_choice(choice) {
            out.insert("tool_choice".to_string(), mapped);
        }
    }

    Ok(Value::Object(out))
}

fn system_text(system: &Value) -> Option<String> {
    match system {
        Value::String(text) => Some(text.clone()),
        Value::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n"))
        }
        _ => None,
    }
}

/// User turns flatten text blocks and split out `tool_result` blocks into
/// separate `role: tool` messages keyed by `tool_use_id`.
fn map_user(message: &Value) -> Result<Vec<Value>, CodecError> {
    let mut out = Vec::new();
    let mut texts: Vec<String> = Vec::new();

    match get(message, "content") {
        Some(Value::String(text)) => texts.push(text.clone()),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            texts.push(text.to_string());
                        }
                    }
                    Some("tool_result") => {
                        flush_user_text(&mut out, &mut texts);
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": block.get("tool_use_id").cloned().unwrap_or(json!("")),
                            "content": tool_result_text(block),
                        }));
                    }
                    // Image and other block kinds are carried as their JSON
                    // text; chat-only upstreams have no native equivalent.
                    _ => texts.push(block.to_string()),
                }
            }
        }
        _ => {}
    }

    flush_user_text(&mut out, &mut texts);
    Ok(out)
}

fn flush_user_text(out: &mut Vec<Value>, texts: &mut Vec<String>) {
    if texts.is_empty() {
        return;
    }
    out.push(json!({"role": "user", "content": texts.join("\n")}));
    texts.clear();
}

fn tool_result_text(block: &Value) -> String {
    match block.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn map_assistant(message: &Value) -> Result<Vec<Value>, CodecError> {
    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match get(message, "content") {
        Some(Value::String(text)) => texts.push(text.clone()),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            texts.push(text.to_string());
                        }
                    }
                    Some("tool_use") => {
                        let args = block.get("input").cloned().unwrap_or(json!({}));
                        let args = serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string());
                        tool_calls.push(json!({
                            "id": block.get("id").cloned().unwrap_or(json!("")),
                            "type": "function",
                            "function": {
                                "name": block.get("name").cloned().unwrap_or(json!("")),
                                "arguments": args,
                            }
                        }));
                    }
                    // thinking blocks do not round-trip; drop them
                    Some("thinking") | Some("redacted_thinking") => {}
                    _ => texts.push(block.to_string()),
                }
            }
        }
        _ => {}
    }

    let mut assistant = Map::new();
    assistant.insert("role".to_string(), json!("assistant"));
    assistant.insert("content".to_string(), json!(texts.join("")));
    if !tool_calls.is_empty() {
        assistant.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }
    Ok(vec![Value::Object(assistant)])
}

fn map_tool(tool: &Value) -> Option<Value> {
    let name = tool.get("name").and_then(Value::as_str)?;
    let mut function = Map::new();
    function.insert("name".to_string(), json!(name));
    if let Some(description) = tool.get("description") {
        function.insert("description".to_string(), description.clone());
    }
    function.insert(
        "parameters".to_string(),
        tool.get("input_schema").cloned().unwrap_or(json!({})),
    );
    Some(json!({"type": "function", "function": function}))
}

fn map_tool_choice(choice: &Value) -> Option<Value> {
    match choice.get("type").and_then(Value::as_str)? {
        "auto" => Some(json!("auto")),
        "any" => Some(json!("required")),
        "tool" => {
            let name = choice.get("name").and_then(Value::as_str)?;
            Some(json!({"type": "function", "function": {"name": name}}))
        }
        _ => None,
    }
}
