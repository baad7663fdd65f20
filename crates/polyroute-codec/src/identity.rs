//! The identity codec (openai-chat in, openai-chat out) still normalizes
//! shapes that differ between clients: null message content, object tool-call
//! arguments, stringified tool parameters, and nameless tool definitions.

use polyroute_protocol::ShapeError;
use serde_json::{Value, json};

use crate::CodecError;

pub fn normalize_chat_request(mut payload: Value) -> Result<Value, CodecError> {
    let map = payload.as_object_mut().ok_or(ShapeError::WrongType {
        path: "".to_string(),
        expected: "an object",
    })?;

    if let Some(Value::Array(messages)) = map.get_mut("messages") {
        for message in messages.iter_mut() {
            normalize_message(message);
        }
    }

    if let Some(Value::Array(tools)) = map.get_mut("tools") {
        tools.retain(tool_has_name);
        for tool in tools.iter_mut() {
            normalize_tool(tool);
        }
    }

    Ok(payload)
}

fn normalize_message(message: &mut Value) {
    let Some(map) = message.as_object_mut() else {
        return;
    };

    match map.get("content") {
        None | Some(Value::Null) => {
            // Assistant turns that only carry tool_calls legitimately have no
            // content; everything else gets an empty string.
            let tool_only = map.get("role").and_then(Value::as_str) == Some("assistant")
                && map.get("tool_calls").is_some();
            if !tool_only {
                map.insert("content".to_string(), json!(""));
            }
        }
        _ => {}
    }

    if let Some(Value::Array(tool_calls)) = map.get_mut("tool_calls") {
        for call in tool_calls.iter_mut() {
            stringify_tool_call_arguments(call);
        }
    }
}

/// Clients sometimes send `function.arguments` as a decoded object; the wire
/// format is a JSON string.
pub(crate) fn stringify_tool_call_arguments(call: &mut Value) {
    let Some(function) = call.get_mut("function").and_then(Value::as_object_mut) else {
        return;
    };
    if let Some(args) = function.get("arguments")
        && !args.is_string()
    {
        let text = serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string());
        function.insert("arguments".to_string(), json!(text));
    }
}

fn tool_has_name(tool: &Value) -> bool {
    tool.get("function")
        .and_then(|f| f.get("name"))
        .and_then(Value::as_str)
        .is_some_and(|name| !name.is_empty())
}

fn normalize_tool(tool: &mut Value) {
    let Some(function) = tool.get_mut("function").and_then(Value::as_object_mut) else {
        return;
    };
    if let Some(Value::String(raw)) = function.get("parameters") {
        let parsed: Value = serde_json::from_str(raw).unwrap_or_else(|_| json!({}));
        function.insert("parameters".to_string(), parsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_content_becomes_empty_string() {
        let payload = json!({"messages": [{"role": "user", "content": null}]});
        let out = normalize_chat_request(payload).unwrap();
        assert_eq!(out["messages"][0]["content"], "");
    }

    #[test]
    fn tool_only_assistant_content_stays_absent() {
        let payload = json!({"messages": [
            {"role": "assistant", "tool_calls": [
                {"id": "c1", "type": "function", "function": {"name": "f", "arguments": {"x": 1}}}
            ]}
        ]});
        let out = normalize_chat_request(payload).unwrap();
        assert!(out["messages"][0].get("content").is_none());
        assert_eq!(
            out["messages"][0]["tool_calls"][0]["function"]["arguments"],
            "{\"x\":1}"
        );
    }

    #[test]
    fn string_parameters_are_parsed_and_nameless_tools_dropped() {
        let payload = json!({"tools": [
            {"type": "function", "function": {"name": "a", "parameters": "{\"type\":\"object\"}"}},
            {"type": "function", "function": {"parameters": {}}}
        ]});
        let out = normalize_chat_request(payload).unwrap();
        let tools = out["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(normalize_chat_request(json!([])).is_err());
    }
}
