use std::collections::HashMap;

use polyroute_protocol::{as_object, get, get_array};
use serde_json::{Map, Value, json};

use crate::{CodecCtx, CodecError};

/// Convert an openai-chat request into a gemini generateContent body.
pub fn convert(payload: Value, _ctx: &CodecCtx) -> Result<Value, CodecError> {
    as_object(&payload, "")?;

    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();
    // gemini functionResponse parts carry the function *name*; chat tool
    // messages carry only the call id, so remember the pairing.
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in get_array(&payload, "messages")? {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
        match role {
            "system" | "developer" => {
                if let Some(text) = text_of(message) {
                    system_parts.push(json!({"text": text}));
                }
            }
            "assistant" => {
                let mut parts: Vec<Value> = Vec::new();
                if let Some(text) = text_of(message).filter(|text| !text.is_empty()) {
                    parts.push(json!({"text": text}));
                }
                if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
                    for call in calls {
                        let function = call.get("function").cloned().unwrap_or(json!({}));
                        let name = function
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string();
                        if let Some(id) = call.get("id").and_then(Value::as_str) {
                            call_names.insert(id.to_string(), name.clone());
                        }
                        let args = match function.get("arguments") {
                            Some(Value::String(raw)) => {
                                serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
                            }
                            Some(other) => other.clone(),
                            None => json!({}),
                        };
                        parts.push(json!({"functionCall": {"name": name, "args": args}}));
                    }
                }
                if !parts.is_empty() {
                    contents.push(json!({"role": "model", "parts": parts}));
                }
            }
            "tool" => {
                let call_id = message
                    .get("tool_call_id")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let name = call_names.get(call_id).cloned().unwrap_or_default();
                contents.push(json!({
                    "role": "user",
                    "parts": [{"functionResponse": {
                        "name": name,
                        "response": {"result": text_of(message).unwrap_or_default()},
                    }}]
                }));
            }
            _ => {
                contents.push(json!({
                    "role": "user",
                    "parts": [{"text": text_of(message).unwrap_or_default()}],
                }));
            }
        }
    }

    let mut out = Map::new();
    if !system_parts.is_empty() {
        out.insert(
            "systemInstruction".to_string(),
            json!({"parts": system_parts}),
        );
    }
    out.insert("contents".to_string(), Value::Array(contents));

    let mut generation = Map::new();
    if let Some(temperature) = get(&payload, "temperature") {
        generation.insert("temperature".to_string(), temperature.clone());
    }
    if let Some(top_p) = get(&payload, "top_p") {
        generation.insert("topP".to_string(), top_p.clone());
    }
    if let Some(max) = get(&payload, "max_tokens").or_else(|| get(&payload, "max_completion_tokens"))
    {
        generation.insert("maxOutputTokens".to_string(), max.clone());
    }
    if let Some(stop) = get(&payload, "stop") {
        let sequences = match stop {
            Value::String(s) => json!([s]),
            other => other.clone(),
        };
        generation.insert("stopSequences".to_string(), sequences);
    }
    if !generation.is_empty() {
        out.insert("generationConfig".to_string(), Value::Object(generation));
    }

    if let Some(tools) = get(&payload, "tools").and_then(Value::as_array) {
        let declarations: Vec<Value> = tools.iter().filter_map(map_tool).collect();
        if !declarations.is_empty() {
            out.insert(
                "tools".to_string(),
                json!([{"functionDeclarations": declarations}]),
            );
        }
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

fn map_tool(tool: &Value) -> Option<Value> {
    let function = tool.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?;
    let mut out = Map::new();
    out.insert("name".to_string(), json!(name));
    if let Some(description) = function.get("description") {
        out.insert("description".to_string(), description.clone());
    }
    if let Some(parameters) = function.get("parameters") {
        out.insert("parameters".to_string(), parameters.clone());
    }
    Some(Value::Object(out))
}
