use polyroute_protocol::{as_object, get};
use serde_json::{Map, Value, json};

use crate::{CodecCtx, CodecError};

/// Convert an openai-responses request into an openai-chat request.
///
/// `instructions` becomes a leading system message; `input` items become
/// chat messages; flat responses tools become nested chat tools.
pub fn convert(payload: Value, _ctx: &CodecCtx) -> Result<Value, CodecError> {
    as_object(&payload, "")?;

    let mut messages: Vec<Value> = Vec::new();
    if let Some(instructions) = get(&payload, "instructions").and_then(Value::as_str)
        && !instructions.is_empty()
    {
        messages.push(json!({"role": "system", "content": instructions}));
    }

    match get(&payload, "input") {
        Some(Value::String(text)) => {
            messages.push(json!({"role": "user", "content": text}));
        }
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(message) = map_input_item(item) {
                    messages.push(message);
                }
            }
        }
        _ => {}
    }

    let mut out = Map::new();
    out.insert(
        "model".to_string(),
        get(&payload, "model").cloned().unwrap_or(json!("")),
    );
    out.insert("messages".to_string(), Value::Array(messages));

    if let Some(max) = get(&payload, "max_output_tokens") {
        out.insert("max_tokens".to_string(), max.clone());
    }
    for key in ["temperature", "top_p", "stream"] {
        if let Some(value) = get(&payload, key) {
            out.insert(key.to_string(), value.clone());
        }
    }

    if let Some(tools) = get(&payload, "tools").and_then(Value::as_array) {
        let mapped: Vec<Value> = tools.iter().filter_map(map_tool).collect();
        if !mapped.is_empty() {
            out.insert("tools".to_string(), Value::Array(mapped));
        }
    }
    if let Some(choice) = get(&payload, "tool_choice") {
        out.insert("tool_choice".to_string(), map_tool_choice(choice));
    }

    Ok(Value::Object(out))
}

fn map_input_item(item: &Value) -> Option<Value> {
    // Bare `{role, content}` items (no type tag) are treated as messages.
    let kind = item
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("message");
    match kind {
        "message" => {
            let role = item.get("role").and_then(Value::as_str).unwrap_or("user");
            let role = match role {
                "system" | "developer" => "system",
                "assistant" => "assistant",
                _ => "user",
            };
            Some(json!({"role": role, "content": item_text(item)}))
        }
        "function_call" => {
            let arguments = item
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            Some(json!({
                "role": "assistant",
                "tool_calls": [{
                    "id": item.get("call_id").cloned().unwrap_or(json!("")),
                    "type": "function",
                    "function": {
                        "name": item.get("name").cloned().unwrap_or(json!("")),
                        "arguments": arguments,
                    }
                }]
            }))
        }
        "function_call_output" => Some(json!({
            "role": "tool",
            "tool_call_id": item.get("call_id").cloned().unwrap_or(json!("")),
            "content": item.get("output").cloned().unwrap_or(json!("")),
        })),
        _ => None,
    }
}

fn item_text(item: &Value) -> String {
    match item.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn map_tool(tool: &Value) -> Option<Value> {
    if tool.get("type").and_then(Value::as_str) != Some("function") {
        return None;
    }
    // Responses tools are flat ({type, name, parameters, …}); chat nests them.
    let name = tool.get("name").and_then(Value::as_str)?;
    let mut function = Map::new();
    function.insert("name".to_string(), json!(name));
    if let Some(description) = tool.get("description") {
        function.insert("description".to_string(), description.clone());
    }
    function.insert(
        "parameters".to_string(),
        tool.get("parameters").cloned().unwrap_or(json!({})),
    );
    Some(json!({"type": "function", "function": function}))
}

fn map_tool_choice(choice: &Value) -> Value {
    match choice {
        Value::Object(map) => match map.get("name").and_then(Value::as_str) {
            Some(name) => json!({"type": "function", "function": {"name": name}}),
            None => choice.clone(),
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_and_items_become_messages() {
        let payload = json!({
            "model": "gpt-4.1",
            "instructions": "be kind",
            "input": [
                {"type": "message", "role": "user", "content": [{"type": "input_text", "text": "hi"}]},
                {"type": "function_call", "call_id": "fc_1", "name": "f", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "fc_1", "output": "42"}
            ],
            "max_output_tokens": 9
        });
        let out = convert(payload, &CodecCtx::new("r", 0)).unwrap();
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages[0], json!({"role": "system", "content": "be kind"}));
        assert_eq!(messages[1]["content"], "hi");
        assert_eq!(messages[2]["tool_calls"][0]["id"], "fc_1");
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(out["max_tokens"], 9);
    }

    #[test]
    fn string_input_and_flat_tools() {
        let payload = json!({
            "model": "m",
            "input": "ping",
            "tools": [{"type": "function", "name": "f", "parameters": {"type": "object"}}]
        });
        let out = convert(payload, &CodecCtx::new("r", 0)).unwrap();
        assert_eq!(out["messages"][0]["content"], "ping");
        assert_eq!(out["tools"][0]["function"]["name"], "f");
    }
}
