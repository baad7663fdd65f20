use serde_json::{Value, json};

use crate::CompatError;
use crate::profile::{ArgsEncoding, CompatProfile};

const FINISH_REASONS: &[&str] = &["stop", "length", "tool_calls", "content_filter"];

pub(crate) fn apply(profile: &CompatProfile, payload: &mut Value) -> Result<(), CompatError> {
    let Some(map) = payload.as_object_mut() else {
        return Err(CompatError::NotAnObject {
            code: "ERR_COMPAT_RESPONSE_SHAPE",
        });
    };

    // created_at -> created, before key restriction.
    if !map.contains_key("created")
        && let Some(created_at) = map.get("created_at").cloned()
    {
        map.insert("created".to_string(), created_at);
    }

    if let Some(allowed) = profile.response_keys {
        map.retain(|key, _| allowed.contains(&key.as_str()));
        map.remove("created_at");
    }

    if let Some(usage) = map.get_mut("usage") {
        alias_usage(usage);
    }

    if let Some(Value::Array(choices)) = map.get_mut("choices") {
        for choice in choices {
            normalize_finish_reason(choice);
            if let Some(message) = choice.get_mut("message") {
                normalize_args(message, profile.response_args);
            }
            if let Some(delta) = choice.get_mut("delta") {
                normalize_args(delta, profile.response_args);
            }
        }
    }

    Ok(())
}

/// Map vendor usage aliases onto the chat names and synthesize the total.
fn alias_usage(usage: &mut Value) {
    let Some(map) = usage.as_object_mut() else {
        return;
    };
    if !map.contains_key("prompt_tokens")
        && let Some(value) = map.remove("input_tokens")
    {
        map.insert("prompt_tokens".to_string(), value);
    }
    if !map.contains_key("completion_tokens")
        && let Some(value) = map.remove("output_tokens")
    {
        map.insert("completion_tokens".to_string(), value);
    }
    if !map.contains_key("total_tokens") {
        let prompt = map
            .get("prompt_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let completion = map
            .get("completion_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        map.insert("total_tokens".to_string(), json!(prompt + completion));
    }
}

fn normalize_finish_reason(choice: &mut Value) {
    let Some(map) = choice.as_object_mut() else {
        return;
    };
    let Some(reason) = map.get("finish_reason").and_then(Value::as_str) else {
        return;
    };
    if FINISH_REASONS.contains(&reason) {
        return;
    }
    let normalized = match reason {
        "max_tokens" | "MAX_TOKENS" => "length",
        "tool_use" | "function_call" => "tool_calls",
        "SAFETY" | "RECITATION" => "content_filter",
        _ => "stop",
    };
    map.insert("finish_reason".to_string(), json!(normalized));
}

fn normalize_args(message: &mut Value, encoding: ArgsEncoding) {
    let Some(calls) = message.get_mut("tool_calls").and_then(Value::as_array_mut) else {
        return;
    };
    for call in calls {
        let Some(function) = call.get_mut("function").and_then(Value::as_object_mut) else {
            continue;
        };
        let Some(arguments) = function.get("arguments").cloned() else {
            continue;
        };
        let normalized = match (encoding, arguments) {
            (ArgsEncoding::String, Value::String(raw)) => Value::String(raw),
            (ArgsEncoding::String, other) => {
                Value::String(serde_json::to_string(&other).unwrap_or_else(|_| "{}".to_string()))
            }
            (ArgsEncoding::Object, Value::String(raw)) => {
                serde_json::from_str(&raw).unwrap_or_else(|_| json!({}))
            }
            (ArgsEncoding::Object, other) => other,
        };
        function.insert("arguments".to_string(), normalized);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompatFilter;
    use polyroute_protocol::ProviderFamily;

    #[test]
    fn usage_aliases_and_total_are_synthesized() {
        let filter = CompatFilter::for_family(ProviderFamily::Openai);
        let mut payload = json!({
            "id": "x",
            "choices": [],
            "usage": {"input_tokens": 3, "output_tokens": 4}
        });
        filter.apply_response(&mut payload).unwrap();
        assert_eq!(
            payload["usage"],
            json!({"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7})
        );
    }

    #[test]
    fn created_at_becomes_created() {
        let filter = CompatFilter::for_family(ProviderFamily::Glm);
        let mut payload = json!({"id": "x", "created_at": 1700, "choices": []});
        filter.apply_response(&mut payload).unwrap();
        assert_eq!(payload["created"], 1700);
        assert!(payload.get("created_at").is_none());
    }

    #[test]
    fn object_arguments_stringified_in_responses() {
        let filter = CompatFilter::for_family(ProviderFamily::Glm);
        let mut payload = json!({
            "id": "x",
            "choices": [{
                "message": {"role": "assistant", "tool_calls": [
                    {"id": "c", "type": "function", "function": {"name": "f", "arguments": {"a": 1}}}
                ]},
                "finish_reason": "tool_use"
            }]
        });
        filter.apply_response(&mut payload).unwrap();
        assert_eq!(
            payload["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"],
            "{\"a\":1}"
        );
        assert_eq!(payload["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn responses_family_bypasses_filter() {
        let filter = CompatFilter::for_family(ProviderFamily::Responses);
        let mut payload = json!({"anything": {"goes": true}});
        filter.apply_response(&mut payload).unwrap();
        assert_eq!(payload["anything"]["goes"], true);
    }
}
