use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::stream::ClientEvent;

/// Streaming converter: openai-chat chunks in, openai-responses events out.
#[derive(Debug)]
pub struct ChatToResponsesStream {
    response_id: String,
    model: String,
    created: i64,
    started: bool,
    text_item_open: bool,
    next_output_index: u64,
    text_output_index: u64,
    tool_items: BTreeMap<i64, ToolItem>,
    accumulated_text: String,
    completed_emitted: bool,
    usage: Option<Value>,
}

#[derive(Debug)]
struct ToolItem {
    output_index: u64,
    item_id: String,
    call_id: String,
    name: String,
    arguments: String,
}

impl ChatToResponsesStream {
    pub fn new(created: i64) -> Self {
        Self {
            response_id: "resp_stream".to_string(),
            model: String::new(),
            created,
            started: false,
            text_item_open: false,
            next_output_index: 0,
            text_output_index: 0,
            tool_items: BTreeMap::new(),
            accumulated_text: String::new(),
            completed_emitted: false,
            usage: None,
        }
    }

    pub fn push(&mut self, chunk: &Value) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        if self.completed_emitted {
            return events;
        }

        if !self.started {
            self.started = true;
            if let Some(id) = chunk.get("id").and_then(Value::as_str) {
                self.response_id = format!("resp_{id}");
            }
            if let Some(model) = chunk.get("model").and_then(Value::as_str) {
                self.model = model.to_string();
            }
            events.push(ClientEvent::named(
                "response.created",
                json!({"type": "response.created", "response": self.response_shell("in_progress")}),
            ));
        }

        if let Some(usage) = chunk.get("usage").filter(|usage| !usage.is_null()) {
            self.usage = Some(json!({
                "input_tokens": usage.get("prompt_tokens").cloned().unwrap_or(json!(0)),
                "output_tokens": usage.get("completion_tokens").cloned().unwrap_or(json!(0)),
                "total_tokens": usage.get("total_tokens").cloned().unwrap_or(json!(0)),
            }));
        }

        let choice = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first());
        if let Some(choice) = choice {
            let delta = choice.get("delta").cloned().unwrap_or(json!({}));

            if let Some(text) = delta.get("content").and_then(Value::as_str)
                && !text.is_empty()
            {
                events.extend(self.emit_text(text));
            }
            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for call in calls {
                    events.extend(self.emit_tool(call));
                }
            }
            if choice.get("finish_reason").and_then(Value::as_str).is_some() {
                events.extend(self.emit_completed());
            }
        }

        events
    }

    pub fn finish(&mut self) -> Vec<ClientEvent> {
        if !self.started {
            return Vec::new();
        }
        self.emit_completed()
    }

    fn emit_text(&mut self, text: &str) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        if !self.text_item_open {
            self.text_item_open = true;
            self.text_output_index = self.take_output_index();
            events.push(ClientEvent::named(
                "response.output_item.added",
                json!({
                    "type": "response.output_item.added",
                    "output_index": self.text_output_index,
                    "item": {
                        "type": "message",
                        "id": format!("msg_{}", self.response_id),
                        "role": "assistant",
                        "status": "in_progress",
                        "content": [],
                    },
                }),
            ));
        }
        self.accumulated_text.push_str(text);
        events.push(ClientEvent::named(
            "response.output_text.delta",
            json!({
                "type": "response.output_text.delta",
                "item_id": format!("msg_{}", self.response_id),
                "output_index": self.text_output_index,
                "content_index": 0,
                "delta": text,
            }),
        ));
        events
    }

    fn emit_tool(&mut self, call: &Value) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        let call_index = call.get("index").and_then(Value::as_i64).unwrap_or(0);

        if !self.tool_items.contains_key(&call_index) {
            let output_index = self.take_output_index();
            let item_id = format!("fc_{}_{call_index}", self.response_id);
            let call_id = call
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(&item_id)
                .to_string();
            let name = call
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            events.push(ClientEvent::named(
                "response.output_item.added",
                json!({
                    "type": "response.output_item.added",
                    "output_index": output_index,
                    "item": {
                        "type": "function_call",
                        "id": item_id.clone(),
                        "call_id": call_id.clone(),
                        "name": name.clone(),
                        "arguments": "",
                        "status": "in_progress",
                    },
                }),
            ));
            self.tool_items.insert(
                call_index,
                ToolItem {
                    output_index,
                    item_id,
                    call_id,
                    name,
                    arguments: String::new(),
                },
            );
        }

        let item = self
            .tool_items
            .get_mut(&call_index)
            .expect("tool item registered above");
        if let Some(arguments) = call
            .get("function")
            .and_then(|f| f.get("arguments"))
            .and_then(Value::as_str)
            && !arguments.is_empty()
        {
            item.arguments.push_str(arguments);
            events.push(ClientEvent::named(
                "response.function_call_arguments.delta",
                json!({
                    "type": "response.function_call_arguments.delta",
                    "item_id": item.item_id.clone(),
                    "output_index": item.output_index,
                    "delta": arguments,
                }),
            ));
        }

        events
    }

    fn emit_completed(&mut self) -> Vec<ClientEvent> {
        if self.completed_emitted {
            return Vec::new();
        }
        self.completed_emitted = true;

        let mut events = Vec::new();
        let mut output: Vec<Value> = Vec::new();

        if self.text_item_open {
            let item = json!({
                "type": "message",
                "id": format!("msg_{}", self.response_id),
                "role": "assistant",
                "status": "completed",
                "content": [{
                    "type": "output_text",
                    "text": self.accumulated_text.clone(),
                    "annotations": [],
                }],
            });
            events.push(ClientEvent::named(
                "response.output_item.done",
                json!({
                    "type": "response.output_item.done",
                    "output_index": self.text_output_index,
                    "item": item.clone(),
                }),
            ));
            output.push(item);
        }
        for item in self.tool_items.values() {
            let done = json!({
                "type": "function_call",
                "id": item.item_id.clone(),
                "call_id": item.call_id.clone(),
                "name": item.name.clone(),
                "arguments": item.arguments.clone(),
                "status": "completed",
            });
            events.push(ClientEvent::named(
                "response.output_item.done",
                json!({
                    "type": "response.output_item.done",
                    "output_index": item.output_index,
                    "item": done.clone(),
                }),
            ));
            output.push(done);
        }

        let mut response = self.response_shell("completed");
        if let Some(map) = response.as_object_mut() {
            map.insert("output".to_string(), Value::Array(output));
            if let Some(usage) = self.usage.take() {
                map.insert("usage".to_string(), usage);
            }
        }
        events.push(ClientEvent::named(
            "response.completed",
            json!({"type": "response.completed", "response": response}),
        ));
        events
    }

    fn response_shell(&self, status: &str) -> Value {
        json!({
            "id": self.response_id.clone(),
            "object": "response",
            "created_at": self.created,
            "status": status,
            "model": self.model.clone(),
            "output": [],
        })
    }

    fn take_output_index(&mut self) -> u64 {
        let index = self.next_output_index;
        self.next_output_index += 1;
        index
    }
}
