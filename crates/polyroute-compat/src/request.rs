use std::collections::HashMap;

use serde_json::{Value, json};

use crate::profile::{ArgsEncoding, CompatProfile};
use crate::rules::apply_rules;
use crate::CompatError;

const KNOWN_ROLES: &[&str] = &["system", "user", "assistant", "tool"];

pub(crate) fn apply(profile: &CompatProfile, payload: &mut Value) -> Result<(), CompatError> {
    let Some(map) = payload.as_object_mut() else {
        return Err(CompatError::NotAnObject {
            code: "ERR_COMPAT_REQUEST_SHAPE",
        });
    };

    if let Some(allowed) = profile.request_keys {
        map.retain(|key, _| allowed.contains(&key.as_str()));
    }

    let has_tools = repair_tools(profile, map);
    if !has_tools {
        map.remove("tool_choice");
    }

    if let Some(Value::Array(messages)) = map.get_mut("messages") {
        for (index, message) in messages.iter_mut().enumerate() {
            normalize_role(message);
            coerce_content(message, index)?;
            normalize_tool_call_args(message, profile.request_args);
            if profile.strip_reasoning_tags {
                strip_reasoning(message);
            }
        }
        apply_rules(&profile.message_rules, messages);
        pair_tool_names(messages);
    }

    Ok(())
}

fn normalize_role(message: &mut Value) {
    let Some(map) = message.as_object_mut() else {
        return;
    };
    let role = map.get("role").and_then(Value::as_str).unwrap_or("");
    if !KNOWN_ROLES.contains(&role) {
        map.insert("role".to_string(), json!("user"));
    }
}

/// Content is coerced to a plain string. Tool results must be non-empty:
/// providers reject empty tool text with opaque errors, so fail fast here.
fn coerce_content(message: &mut Value, index: usize) -> Result<(), CompatError> {
    let Some(map) = message.as_object_mut() else {
        return Ok(());
    };
    let is_tool = map.get("role").and_then(Value::as_str) == Some("tool");

    let coerced = match map.get("content") {
        Some(Value::String(_)) => None,
        Some(Value::Array(parts)) => {
            let text = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            Some(Value::String(text))
        }
        Some(Value::Null) | None => {
            let tool_only =
                map.get("role").and_then(Value::as_str) == Some("assistant")
                    && map.get("tool_calls").is_some();
            if tool_only {
                None
            } else {
                Some(Value::String(String::new()))
            }
        }
        Some(other) => Some(Value::String(other.to_string())),
    };
    if let Some(content) = coerced {
        map.insert("content".to_string(), content);
    }

    if is_tool {
        let empty = map
            .get("content")
            .and_then(Value::as_str)
            .is_none_or(|text| text.trim().is_empty());
        if empty {
            return Err(CompatError::EmptyToolContent { index });
        }
    }
    Ok(())
}

fn normalize_tool_call_args(message: &mut Value, encoding: ArgsEncoding) {
    let Some(calls) = message.get_mut("tool_calls").and_then(Value::as_array_mut) else {
        return;
    };
    for call in calls {
        let Some(function) = call.get_mut("function").and_then(Value::as_object_mut) else {
            continue;
        };
        let current = function.get("arguments").cloned();
        let normalized = match (encoding, current) {
            (ArgsEncoding::String, Some(Value::String(raw))) => Value::String(raw),
            (ArgsEncoding::String, Some(other)) => {
                Value::String(serde_json::to_string(&other).unwrap_or_else(|_| "{}".to_string()))
            }
            (ArgsEncoding::Object, Some(Value::String(raw))) => {
                serde_json::from_str(&raw).unwrap_or_else(|_| json!({}))
            }
            (ArgsEncoding::Object, Some(other)) => other,
            (_, None) => match encoding {
                ArgsEncoding::String => Value::String("{}".to_string()),
                ArgsEncoding::Object => json!({}),
            },
        };
        function.insert("arguments".to_string(), normalized);
    }
}

/// Ensure tool definitions are usable: parameters present as an object,
/// provider-rejected fields removed, the shell tool's command shaped as
/// `array<string>`. Returns whether any tools remain.
fn repair_tools(profile: &CompatProfile, map: &mut serde_json::Map<String, Value>) -> bool {
    let Some(Value::Array(tools)) = map.get_mut("tools") else {
        return false;
    };

    tools.retain(|tool| {
        tool.get("function")
            .and_then(|function| function.get("name"))
            .and_then(Value::as_str)
            .is_some_and(|name| !name.is_empty())
    });

    let mut seen: Vec<String> = Vec::new();
    tools.retain(|tool| {
        let name = tool
            .get("function")
            .and_then(|function| function.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if seen.contains(&name) {
            false
        } else {
            seen.push(name);
            true
        }
    });

    for tool in tools.iter_mut() {
        let Some(function) = tool.get_mut("function").and_then(Value::as_object_mut) else {
            continue;
        };
        match function.get("parameters") {
            Some(Value::Object(_)) => {}
            Some(Value::String(raw)) => {
                let parsed: Value =
                    serde_json::from_str(raw).unwrap_or_else(|_| json!({"type": "object"}));
                function.insert("parameters".to_string(), parsed);
            }
            _ => {
                function.insert("parameters".to_string(), json!({"type": "object"}));
            }
        }
        if profile.strip_strict {
            function.remove("strict");
        }
        if profile.fix_shell_tool
            && function.get("name").and_then(Value::as_str) == Some("shell")
            && let Some(command) = function
                .get_mut("parameters")
                .and_then(|parameters| parameters.get_mut("properties"))
                .and_then(|properties| properties.get_mut("command"))
                .and_then(Value::as_object_mut)
        {
            command.insert("type".to_string(), json!("array"));
            command.insert("items".to_string(), json!({"type": "string"}));
        }
    }

    let has_tools = !tools.is_empty();
    if !has_tools {
        map.remove("tools");
    } else if profile.fix_shell_tool && map.get("tool_choice").is_none() {
        map.insert("tool_choice".to_string(), json!("auto"));
    }
    has_tools
}

/// Give each `role: tool` message the function name from the assistant turn
/// that issued the matching call id.
fn pair_tool_names(messages: &mut [Value]) {
    let mut names: HashMap<String, String> = HashMap::new();
    for message in messages.iter() {
        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                if let (Some(id), Some(name)) = (
                    call.get("id").and_then(Value::as_str),
                    call.get("function")
                        .and_then(|function| function.get("name"))
                        .and_then(Value::as_str),
                ) {
                    names.insert(id.to_string(), name.to_string());
                }
            }
        }
    }
    for message in messages.iter_mut() {
        let Some(map) = message.as_object_mut() else {
            continue;
        };
        if map.get("role").and_then(Value::as_str) != Some("tool") || map.contains_key("name") {
            continue;
        }
        if let Some(name) = map
            .get("tool_call_id")
            .and_then(Value::as_str)
            .and_then(|id| names.get(id))
        {
            map.insert("name".to_string(), json!(name));
        }
    }
}

fn strip_reasoning(message: &mut Value) {
    let Some(map) = message.as_object_mut() else {
        return;
    };
    if let Some(Value::String(content)) = map.get("content") {
        let stripped = strip_tag_blocks(content, "reasoning");
        let stripped = strip_tag_blocks(&stripped, "think");
        if stripped != *content {
            map.insert("content".to_string(), json!(stripped));
        }
    }
}

fn strip_tag_blocks(text: &str, tag: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(&open) {
        out.push_str(&rest[..start]);
        match rest[start..].find(&close) {
            Some(end) => rest = &rest[start + end + close.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompatFilter;
    use polyroute_protocol::ProviderFamily;

    #[test]
    fn unknown_roles_become_user_and_keys_are_restricted() {
        let filter = CompatFilter::for_family(ProviderFamily::Openai);
        let mut payload = json!({
            "model": "m",
            "messages": [{"role": "narrator", "content": "x"}],
            "x_vendor_flag": true
        });
        filter.apply_request(&mut payload).unwrap();
        assert_eq!(payload["messages"][0]["role"], "user");
        assert!(payload.get("x_vendor_flag").is_none());
    }

    #[test]
    fn empty_tool_content_fails_fast() {
        let filter = CompatFilter::for_family(ProviderFamily::Openai);
        let mut payload = json!({
            "model": "m",
            "messages": [{"role": "tool", "tool_call_id": "c", "content": "  "}]
        });
        let err = filter.apply_request(&mut payload).unwrap_err();
        assert_eq!(err.code(), "ERR_COMPAT_TOOL_TEXT_EMPTY");
    }

    #[test]
    fn glm_shell_tool_is_repaired() {
        let filter = CompatFilter::for_family(ProviderFamily::Glm);
        let mut payload = json!({
            "model": "glm-4",
            "messages": [{"role": "user", "content": "run ls"}],
            "tools": [{"type": "function", "function": {
                "name": "shell",
                "strict": true,
                "parameters": {"type": "object", "properties": {"command": {"type": "string"}}}
            }}]
        });
        filter.apply_request(&mut payload).unwrap();
        let function = &payload["tools"][0]["function"];
        assert!(function.get("strict").is_none());
        assert_eq!(
            function["parameters"]["properties"]["command"],
            json!({"type": "array", "items": {"type": "string"}})
        );
        assert_eq!(payload["tool_choice"], "auto");
    }

    #[test]
    fn tool_choice_dropped_without_tools() {
        let filter = CompatFilter::for_family(ProviderFamily::Openai);
        let mut payload = json!({
            "model": "m",
            "messages": [],
            "tool_choice": "auto"
        });
        filter.apply_request(&mut payload).unwrap();
        assert!(payload.get("tool_choice").is_none());
    }

    #[test]
    fn tool_messages_get_paired_names() {
        let filter = CompatFilter::for_family(ProviderFamily::Openai);
        let mut payload = json!({
            "model": "m",
            "messages": [
                {"role": "assistant", "tool_calls": [
                    {"id": "c1", "type": "function", "function": {"name": "lookup", "arguments": "{}"}}
                ]},
                {"role": "tool", "tool_call_id": "c1", "content": "ok"}
            ]
        });
        filter.apply_request(&mut payload).unwrap();
        assert_eq!(payload["messages"][1]["name"], "lookup");
    }

    #[test]
    fn reasoning_tags_are_stripped_for_glm() {
        let filter = CompatFilter::for_family(ProviderFamily::Glm);
        let mut payload = json!({
            "model": "m",
            "messages": [{"role": "user", "content": "<reasoning>hmm</reasoning>question"}]
        });
        filter.apply_request(&mut payload).unwrap();
        assert_eq!(payload["messages"][0]["content"], "question");
    }

    #[test]
    fn object_arguments_are_stringified() {
        let filter = CompatFilter::for_family(ProviderFamily::Openai);
        let mut payload = json!({
            "model": "m",
            "messages": [{"role": "assistant", "tool_calls": [
                {"id": "c", "type": "function", "function": {"name": "f", "arguments": {"a": 1}}}
            ]}]
        });
        filter.apply_request(&mut payload).unwrap();
        assert_eq!(
            payload["messages"][0]["tool_calls"][0]["function"]["arguments"],
            "{\"a\":1}"
        );
    }
}
