use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::finish_reason_from_stop;
use crate::stream::UpstreamEvent;

/// Streaming converter: anthropic typed events in, openai-chat chunks out.
///
/// Anthropic numbers content blocks; chat numbers tool calls. The mapping is
/// rebuilt from `content_block_start` events as they arrive.
#[derive(Debug)]
pub struct AnthropicToChatStream {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    next_tool_index: i64,
    tool_index_by_block: BTreeMap<u64, i64>,
    finish_reason: Option<&'static str>,
    finish_emitted: bool,
}

impl AnthropicToChatStream {
    pub fn new(created: i64) -> Self {
        Self {
            id: "chatcmpl_stream".to_string(),
            model: String::new(),
            created,
            role_sent: false,
            next_tool_index: 0,
            tool_index_by_block: BTreeMap::new(),
            finish_reason: None,
            finish_emitted: false,
        }
    }

    pub fn push(&mut self, event: &UpstreamEvent) -> Vec<Value> {
        let kind = event
            .name
            .as_deref()
            .or_else(|| event.data.get("type").and_then(Value::as_str))
            .unwrap_or("");
        match kind {
            "message_start" => {
                let message = event.data.get("message").cloned().unwrap_or(json!({}));
                if let Some(id) = message.get("id").and_then(Value::as_str) {
                    self.id = id.to_string();
                }
                if let Some(model) = message.get("model").and_then(Value::as_str) {
                    self.model = model.to_string();
                }
                self.role_sent = true;
                vec![self.chunk(json!({"role": "assistant"}), None)]
            }
            "content_block_start" => self.on_block_start(&event.data),
            "content_block_delta" => self.on_block_delta(&event.data),
            "message_delta" => {
                if let Some(stop) = event
                    .data
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(Value::as_str)
                {
                    self.finish_reason = Some(finish_reason_from_stop(stop));
                }
                Vec::new()
            }
            "message_stop" => self.emit_finish(),
            // content_block_stop and ping carry nothing for chat
            _ => Vec::new(),
        }
    }

    pub fn finish(&mut self) -> Vec<Value> {
        self.emit_finish()
    }

    fn emit_finish(&mut self) -> Vec<Value> {
        if self.finish_emitted {
            return Vec::new();
        }
        self.finish_emitted = true;
        let reason = self.finish_reason.unwrap_or("stop");
        vec![self.terminal_chunk(reason)]
    }

    fn on_block_start(&mut self, data: &Value) -> Vec<Value> {
        let block_index = data.get("index").and_then(Value::as_u64).unwrap_or(0);
        let block = data.get("content_block").cloned().unwrap_or(json!({}));
        if block.get("type").and_then(Value::as_str) != Some("tool_use") {
            return Vec::new();
        }
        let tool_index = self.next_tool_index;
        self.next_tool_index += 1;
        self.tool_index_by_block.insert(block_index, tool_index);
        vec![self.chunk(
            json!({"tool_calls": [{
                "index": tool_index,
                "id": block.get("id").cloned().unwrap_or(json!("")),
                "type": "function",
                "function": {
                    "name": block.get("name").cloned().unwrap_or(json!("")),
                    "arguments": "",
                }
            }]}),
            None,
        )]
    }

    fn on_block_delta(&mut self, data: &Value) -> Vec<Value> {
        let block_index = data.get("index").and_then(Value::as_u64).unwrap_or(0);
        let delta = data.get("delta").cloned().unwrap_or(json!({}));
        match delta.get("type").and_then(Value::as_str) {
            Some("text_delta") => {
                let text = delta.get("text").cloned().unwrap_or(json!(""));
                vec![self.chunk(json!({"content": text}), None)]
            }
            Some("input_json_delta") => {
                let Some(&tool_index) = self.tool_index_by_block.get(&block_index) else {
                    return Vec::new();
                };
                let partial = delta.get("partial_json").cloned().unwrap_or(json!(""));
                vec![self.chunk(
                    json!({"tool_calls": [{
                        "index": tool_index,
                        "function": {"arguments": partial}
                    }]}),
                    None,
                )]
            }
            _ => Vec::new(),
        }
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

    fn terminal_chunk(&self, reason: &str) -> Value {
        self.chunk(json!({}), Some(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, data: Value) -> UpstreamEvent {
        UpstreamEvent {
            name: Some(name.to_string()),
            data,
        }
    }

    #[test]
    fn anthropic_stream_becomes_chat_chunks() {
        let mut state = AnthropicToChatStream::new(1700);
        let mut chunks = Vec::new();
        chunks.extend(state.push(&event(
            "message_start",
            json!({"type": "message_start", "message": {"id": "msg_1", "model": "claude-x"}}),
        )));
        chunks.extend(state.push(&event(
            "content_block_start",
            json!({"index": 0, "content_block": {"type": "text", "text": ""}}),
        )));
        chunks.extend(state.push(&event(
            "content_block_delta",
            json!({"index": 0, "delta": {"type": "text_delta", "text": "hi"}}),
        )));
        chunks.extend(state.push(&event(
            "message_delta",
            json!({"delta": {"stop_reason": "end_turn"}}),
        )));
        chunks.extend(state.push(&event("message_stop", json!({}))));

        assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "hi");
        assert_eq!(
            chunks.last().unwrap()["choices"][0]["finish_reason"],
            "stop"
        );
        assert!(state.finish().is_empty());
    }

    #[test]
    fn tool_use_blocks_map_to_tool_call_indices() {
        let mut state = AnthropicToChatStream::new(0);
        state.push(&event("message_start", json!({"message": {"id": "m"}})));
        let start = state.push(&event(
            "content_block_start",
            json!({"index": 1, "content_block": {"type": "tool_use", "id": "tu", "name": "f"}}),
        ));
        assert_eq!(start[0]["choices"][0]["delta"]["tool_calls"][0]["index"], 0);
        let delta = state.push(&event(
            "content_block_delta",
            json!({"index": 1, "delta": {"type": "input_json_delta", "partial_json": "{}"}}),
        ));
        assert_eq!(
            delta[0]["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"],
            "{}"
        );
    }
}
