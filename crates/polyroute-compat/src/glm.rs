//! GLM coding-host mappers. The coding gateway is stricter than the open
//! API: assistant turns that carry tool_calls must send `content: null`,
//! content arrays are not accepted, and tool-call arguments come back as
//! objects while clients expect strings.

use serde_json::{Value, json};

const GLM_CODING_HOST: &str = "open.bigmodel.cn/api/coding";

pub fn is_glm_coding_host(base_url: &str) -> bool {
    base_url.contains(GLM_CODING_HOST)
}

/// Request-side mapper, applied after the shape filter.
pub fn glm_coding_request(payload: &mut Value) {
    let Some(messages) = payload
        .get_mut("messages")
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for message in messages {
        let Some(map) = message.as_object_mut() else {
            continue;
        };
        if let Some(Value::Array(parts)) = map.get("content") {
            let text = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            map.insert("content".to_string(), json!(text));
        }
        let assistant_with_calls = map.get("role").and_then(Value::as_str) == Some("assistant")
            && map
                .get("tool_calls")
                .and_then(Value::as_array)
                .is_some_and(|calls| !calls.is_empty());
        if assistant_with_calls {
            let empty = map
                .get("content")
                .and_then(Value::as_str)
                .is_none_or(str::is_empty);
            if empty {
                map.insert("content".to_string(), Value::Null);
            }
        }
    }
}

/// Response-side mapper.
pub fn glm_coding_response(payload: &mut Value) {
    let Some(map) = payload.as_object_mut() else {
        return;
    };
    if !map.contains_key("created")
        && let Some(created_at) = map.remove("created_at")
    {
        map.insert("created".to_string(), created_at);
    }
    if let Some(Value::Array(choices)) = map.get_mut("choices") {
        for choice in choices {
            for slot in ["message", "delta"] {
                if let Some(calls) = choice
                    .get_mut(slot)
                    .and_then(|message| message.get_mut("tool_calls"))
                    .and_then(Value::as_array_mut)
                {
                    for call in calls {
                        if let Some(function) =
                            call.get_mut("function").and_then(Value::as_object_mut)
                            && let Some(arguments) = function.get("arguments")
                            && !arguments.is_string()
                        {
                            let text = serde_json::to_string(arguments)
                                .unwrap_or_else(|_| "{}".to_string());
                            function.insert("arguments".to_string(), json!(text));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coding_host_is_detected() {
        assert!(is_glm_coding_host("https://open.bigmodel.cn/api/coding/paas/v4"));
        assert!(!is_glm_coding_host("https://open.bigmodel.cn/api/paas/v4"));
    }

    #[test]
    fn assistant_tool_turns_get_null_content() {
        let mut payload = json!({"messages": [
            {"role": "assistant", "content": "", "tool_calls": [{"id": "c"}]},
            {"role": "user", "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}
        ]});
        glm_coding_request(&mut payload);
        assert!(payload["messages"][0]["content"].is_null());
        assert_eq!(payload["messages"][1]["content"], "a\nb");
    }

    #[test]
    fn response_arguments_are_stringified() {
        let mut payload = json!({
            "created_at": 1700,
            "choices": [{"message": {"tool_calls": [
                {"id": "c", "function": {"name": "f", "arguments": {"a": 1}}}
            ]}}]
        });
        glm_coding_response(&mut payload);
        assert_eq!(payload["created"], 1700);
        assert_eq!(
            payload["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"],
            "{\"a\":1}"
        );
    }
}
