use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::stream::UpstreamEvent;

/// Streaming converter: openai-responses events in, openai-chat chunks out.
#[derive(Debug)]
pub struct ResponsesToChatStream {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    next_tool_index: i64,
    tool_index_by_item: BTreeMap<String, i64>,
    finish_emitted: bool,
    saw_tool_call: bool,
}

impl ResponsesToChatStream {
    pub fn new(created: i64) -> Self {
        Self {
            id: "chatcmpl_stream".to_string(),
            model: String::new(),
            created,
            role_sent: false,
            next_tool_index: 0,
            tool_index_by_item: BTreeMap::new(),
            finish_emitted: false,
            saw_tool_call: false,
        }
    }

    pub fn push(&mut self, event: &UpstreamEvent) -> Vec<Value> {
        let kind = event
            .name
            .as_deref()
            .or_else(|| event.data.get("type").and_then(Value::as_str))
            .unwrap_or("");
        match kind {
            "response.created" => {
                let response = event.data.get("response").cloned().unwrap_or(json!({}));
                if let Some(id) = response.get("id").and_then(Value::as_str) {
                    self.id = id.to_string();
                }
                if let Some(model) = response.get("model").and_then(Value::as_str) {
                    self.model = model.to_string();
                }
                self.role_sent = true;
                vec![self.chunk(json!({"role": "assistant"}), None)]
            }
            "response.output_item.added" => self.on_item_added(&event.data),
            "response.output_text.delta" => {
                let delta = event.data.get("delta").cloned().unwrap_or(json!(""));
                vec![self.chunk(json!({"content": delta}), None)]
            }
            "response.function_call_arguments.delta" => self.on_arguments_delta(&event.data),
            "response.completed"
            | "response.incomplete"
            | "response.failed" => self.on_completed(kind, &event.data),
            _ => Vec::new(),
        }
    }

    pub fn finish(&mut self) -> Vec<Value> {
        if self.finish_emitted {
            return Vec::new();
        }
        self.finish_emitted = true;
        let reason = if self.saw_tool_call { "tool_calls" } else { "stop" };
        vec![self.chunk(json!({}), Some(reason))]
    }

    fn on_item_added(&mut self, data: &Value) -> Vec<Value> {
        let item = data.get("item").cloned().unwrap_or(json!({}));
        if item.get("type").and_then(Value::as_str) != Some("function_call") {
            return Vec::new();
        }
        self.saw_tool_call = true;
        let item_id = item
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("item")
            .to_string();
        let tool_index = self.next_tool_index;
        self.next_tool_index += 1;
        self.tool_index_by_item.insert(item_id, tool_index);
        vec![self.chunk(
            json!({"tool_calls": [{
                "index": tool_index,
                "id": item.get("call_id").cloned().unwrap_or(json!("")),
                "type": "function",
                "function": {
                    "name": item.get("name").cloned().unwrap_or(json!("")),
                    "arguments": "",
                }
            }]}),
            None,
        )]
    }

    fn on_arguments_delta(&mut self, data: &Value) -> Vec<Value> {
        let item_id = data.get("item_id").and_then(Value::as_str).unwrap_or("");
        let Some(&tool_index) = self.tool_index_by_item.get(item_id) else {
            return Vec::new();
        };
        let delta = data.get("delta").cloned().unwrap_or(json!(""));
        vec![self.chunk(
            json!({"tool_calls": [{
                "index": tool_index,
                "function": {"arguments": delta}
            }]}),
            None,
        )]
    }

    fn on_completed(&mut self, kind: &str, data: &Value) -> Vec<Value> {
        if self.finish_emitted {
            return Vec::new();
        }
        self.finish_emitted = true;

        let reason = if self.saw_tool_call {
            "tool_calls"
        } else if kind == "response.incomplete" {
            "length"
        } else {
            "stop"
        };
        let mut chunk = self.chunk(json!({}), Some(reason));
        let usage = data
            .get("response")
            .and_then(|response| response.get("usage"))
            .filter(|usage| !usage.is_null());
        if let Some(usage) = usage
            && let Some(map) = chunk.as_object_mut()
        {
            map.insert(
                "usage".to_string(),
                json!({
                    "prompt_tokens": usage.get("input_tokens").cloned().unwrap_or(json!(0)),
                    "completion_tokens": usage.get("output_tokens").cloned().unwrap_or(json!(0)),
                    "total_tokens": usage.get("total_tokens").cloned().unwrap_or(json!(0)),
                }),
            );
        }
        vec![chunk]
    }

    fn chunk(&self, delta: Value, finish: Option<&str>) -> Value {
        json!({
            "id": self.id.clone(),
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model.clone(),
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish,
            }]
        })
    }
}
