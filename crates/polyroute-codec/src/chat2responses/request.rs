use polyroute_protocol::{as_object, get, get_array};
use serde_json::{Map, Value, json};

use crate::{CodecCtx, CodecError};

/// Convert an openai-chat request into an openai-responses request.
pub fn convert(payload: Value, _ctx: &CodecCtx) -> Result<Value, CodecError> {
    as_object(&payload, "")?;

    let mut instructions: Vec<String> = Vec::new();
    let mut input: Vec<Value> = Vec::new();

    for message in get_array(&payload, "messages")? {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
        match role {
            "system" | "developer" => {
                if let Some(text) = text_of(message) {
                    instructions.push(text);
                }
            }
            "assistant" => {
                if let Some(text) = text_of(message).filter(|text| !text.is_empty()) {
                    input.push(json!({
                        "type": "message",
                        "role": "assistant",
                        "content": [{"type": "output_text", "text": text}],
                    }));
                }
                if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
                    for call in calls {
                        let function = call.get("function").cloned().unwrap_or(json!({}));
                        input.push(json!({
                            "type": "function_call",
                            "call_id": call.get("id").cloned().unwrap_or(json!("")),
                            "name": function.get("name").cloned().unwrap_or(json!("")),
                            "arguments": arguments_string(&function),
                        }));
                    }
                }
            }
            "tool" => {
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": message.get("tool_call_id").cloned().unwrap_or(json!("")),
                    "output": text_of(message).unwrap_or_default(),
                }));
            }
            _ => {
                input.push(json!({
                    "type": "message",
                    "role": "user",
                    "content": [{"type": "input_text", "text": text_of(message).unwrap_or_default()}],
                }));
            }
        }
    }

    let mut out = Map::new();
    out.insert(
        "model".to_string(),
        get(&payload, "model").cloned().unwrap_or(json!("")),
    );
    if !instructions.is_empty() {
        out.insert("instructions".to_string(), json!(instructions.join("\n")));
    }
    out.insert("input".to_string(), Value::Array(input));

    if let Some(max) = get(&payload, "max_tokens").or_else(|| get(&payload, "max_completion_tokens"))
    {
        out.insert("max_output_tokens".to_string(), max.clone());
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

fn text_of(message: &Value) -> Option<String> {
    match message.get("content") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Array(parts)) => Some(
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

fn arguments_string(function: &Value) -> Value {
    match function.get("arguments") {
        Some(Value::String(raw)) => json!(raw),
        Some(other) => json!(serde_json::to_string(other).unwrap_or_else(|_| "{}".to_string())),
        None => json!("{}"),
    }
}

/// Chat nests the function under `function`; responses tools are flat.
fn map_tool(tool: &Value) -> Option<Value> {
    let function = tool.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?;
    let mut out = Map::new();
    out.insert("type".to_string(), json!("function"));
    out.insert("name".to_string(), json!(name));
    if let Some(description) = function.get("description") {
        out.insert("description".to_string(), description.clone());
    }
    out.insert(
        "parameters".to_string(),
        function.get("parameters").cloned().unwrap_or(json!({})),
    );
    Some(Value::Object(out))
}

fn map_tool_choice(choice: &Value) -> Value {
    match choice {
        Value::Object(_) => match choice
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
        {
            Some(name) => json!({"type": "function", "name": name}),
            None => choice.clone(),
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_history_becomes_input_items() {
        let payload = json!({
            "model": "gpt-4.1",
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "q"},
                {"role": "assistant", "content": "", "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "f", "arguments": "{}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "out"}
            ],
            "max_tokens": 5
        });
        let out = convert(payload, &CodecCtx::new("r", 0)).unwrap();
        assert_eq!(out["instructions"], "sys");
        let input = out["input"].as_array().unwrap();
        assert_eq!(input[0]["content"][0]["type"], "input_text");
        assert_eq!(input[1]["type"], "function_call");
        assert_eq!(input[2], json!({"type": "function_call_output", "call_id": "call_1", "output": "out"}));
        assert_eq!(out["max_output_tokens"], 5);
    }

    #[test]
    fn nested_tools_flatten() {
        let payload = json!({
            "model": "m",
            "messages": [],
            "tools": [{"type": "function", "function": {"name": "f", "parameters": {"type": "object"}}}],
            "tool_choice": {"type": "function", "function": {"name": "f"}}
        });
        let out = convert(payload, &CodecCtx::new("r", 0)).unwrap();
        assert_eq!(out["tools"][0]["name"], "f");
        assert!(out["tools"][0].get("function").is_none());
        assert_eq!(out["tool_choice"], json!({"type": "function", "name": "f"}));
    }
}
