use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::stop_reason_from_finish;
use crate::stream::ClientEvent;

/// Streaming converter: openai-chat chunks in, anthropic typed events out.
///
/// Content blocks are numbered in order of first appearance; tool-call
/// argument deltas are tracked per `tool_calls[].index` and coalesced into a
/// pending buffer so a run of tiny fragments becomes one `input_json_delta`.
/// The caller drains the buffer on a timer via `flush_pending`.
#[derive(Debug)]
pub struct ChatToAnthropicStream {
    message_started: bool,
    finish_emitted: bool,
    next_block_index: u64,
    text_block: Option<u64>,
    tool_blocks: BTreeMap<i64, u64>,
    pending_json: Option<(u64, String)>,
    stop_reason: &'static str,
    usage: Option<Value>,
}

impl ChatToAnthropicStream {
    pub fn new() -> Self {
        Self {
            message_started: false,
            finish_emitted: false,
            next_block_index: 0,
            text_block: None,
            tool_blocks: BTreeMap::new(),
            pending_json: None,
            stop_reason: "end_turn",
            usage: None,
        }
    }

    pub fn push(&mut self, chunk: &Value) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        if self.finish_emitted {
            return events;
        }

        if !self.message_started {
            self.message_started = true;
            events.push(message_start(chunk));
        }

        if let Some(usage) = chunk.get("usage").filter(|usage| !usage.is_null()) {
            self.usage = Some(map_usage(usage));
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
                events.extend(self.flush_pending());
                events.extend(self.emit_text(text));
            }

            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for call in calls {
                    events.extend(self.emit_tool_delta(call));
                }
            }

            if let Some(finish) = choice.get("finish_reason").and_then(Value::as_str) {
                self.stop_reason = stop_reason_from_finish(finish);
                events.extend(self.emit_terminal());
            }
        }

        events
    }

    /// Drain the coalescing buffer. Called on the manager's flush tick so
    /// argument deltas are not held longer than the coalescing window.
    pub fn flush_pending(&mut self) -> Vec<ClientEvent> {
        let Some((index, partial)) = self.pending_json.take() else {
            return Vec::new();
        };
        if partial.is_empty() {
            return Vec::new();
        }
        vec![content_block_delta(
            index,
            json!({"type": "input_json_delta", "partial_json": partial}),
        )]
    }

    /// Exactly-once terminal: called by the streaming manager when the
    /// upstream ends without a finish_reason.
    pub fn finish(&mut self) -> Vec<ClientEvent> {
        if !self.message_started {
            return Vec::new();
        }
        self.emit_terminal()
    }

    fn emit_terminal(&mut self) -> Vec<ClientEvent> {
        if self.finish_emitted {
            return Vec::new();
        }
        self.finish_emitted = true;

        let mut events = self.flush_pending();
        if let Some(index) = self.text_block.take() {
            events.push(content_block_stop(index));
        }
        for (_, index) in std::mem::take(&mut self.tool_blocks) {
            events.push(content_block_stop(index));
        }

        let usage = self
            .usage
            .take()
            .unwrap_or_else(|| json!({"output_tokens": 0}));
        events.push(ClientEvent::named(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": self.stop_reason, "stop_sequence": null},
                "usage": usage,
            }),
        ));
        events.push(ClientEvent::named(
            "message_stop",
            json!({"type": "message_stop"}),
        ));
        events
    }

    fn emit_text(&mut self, text: &str) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        let index = match self.text_block {
            Some(index) => index,
            None => {
                let index = self.take_block_index();
                self.text_block = Some(index);
                events.push(ClientEvent::named(
                    "content_block_start",
                    json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": {"type": "text", "text": ""},
                    }),
                ));
                index
            }
        };
        events.push(content_block_delta(
            index,
            json!({"type": "text_delta", "text": text}),
        ));
        events
    }

    fn emit_tool_delta(&mut self, call: &Value) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        let call_index = call.get("index").and_then(Value::as_i64).unwrap_or(0);

        let block_index = match self.tool_blocks.get(&call_index) {
            Some(index) => *index,
            None => {
                events.extend(self.flush_pending());
                let index = self.take_block_index();
                self.tool_blocks.insert(call_index, index);
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| format!("toolu_{call_index}"));
                let name = call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("tool");
                events.push(ClientEvent::named(
                    "content_block_start",
                    json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}},
                    }),
                ));
                index
            }
        };

        if let Some(arguments) = call
            .get("function")
            .and_then(|f| f.get("arguments"))
            .and_then(Value::as_str)
            && !arguments.is_empty()
        {
            let other_block_pending =
                matches!(&self.pending_json, Some((index, _)) if *index != block_index);
            if other_block_pending {
                events.extend(self.flush_pending());
            }
            match &mut self.pending_json {
                Some((_, buffer)) => buffer.push_str(arguments),
                None => self.pending_json = Some((block_index, arguments.to_string())),
            }
        }

        events
    }

    fn take_block_index(&mut self) -> u64 {
        let index = self.next_block_index;
        self.next_block_index += 1;
        index
    }
}

fn message_start(chunk: &Value) -> ClientEvent {
    let id = chunk
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("msg_stream");
    let model = chunk.get("model").and_then(Value::as_str).unwrap_or("");
    ClientEvent::named(
        "message_start",
        json!({
            "type": "message_start",
            "message": {
                "id": id,
                "type": "message",
                "role": "assistant",
                "model": model,
                "content": [],
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": 0, "output_tokens": 0},
            }
        }),
    )
}

fn content_block_delta(index: u64, delta: Value) -> ClientEvent {
    ClientEvent::named(
        "content_block_delta",
        json!({"type": "content_block_delta", "index": index, "delta": delta}),
    )
}

fn content_block_stop(index: u64) -> ClientEvent {
    ClientEvent::named(
        "content_block_stop",
        json!({"type": "content_block_stop", "index": index}),
    )
}

fn map_usage(usage: &Value) -> Value {
    json!({
        "input_tokens": usage.get("prompt_tokens").cloned().unwrap_or(json!(0)),
        "output_tokens": usage.get("completion_tokens").cloned().unwrap_or(json!(0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(events: &[ClientEvent]) -> Vec<&str> {
        events
            .iter()
            .map(|event| event.name.as_deref().unwrap_or(""))
            .collect()
    }

    #[test]
    fn text_stream_emits_anthropic_lifecycle() {
        let mut state = ChatToAnthropicStream::new();
        let mut events = Vec::new();
        events.extend(state.push(&json!({
            "id": "c1", "model": "gpt-4",
            "choices": [{"delta": {"content": "Hel"}}]
        })));
        events.extend(state.push(&json!({"choices": [{"delta": {"content": "lo"}}]})));
        events.extend(state.push(&json!({"choices": [{"delta": {}, "finish_reason": "stop"}]})));

        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert_eq!(events[2].data["delta"]["text"], "Hel");
        assert_eq!(events[5].data["delta"]["stop_reason"], "end_turn");
        // terminal is exactly once
        assert!(state.finish().is_empty());
    }

    #[test]
    fn tool_call_deltas_accumulate_per_index() {
        let mut state = ChatToAnthropicStream::new();
        let mut events = state.push(&json!({
            "id": "c1", "model": "m",
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "f", "arguments": "{\"a\""}}
            ]}}]
        }));
        events.extend(state.push(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": ":1}"}}
            ]}}]
        })));
        events.extend(state.push(&json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]})));

        let deltas: Vec<&ClientEvent> = events
            .iter()
            .filter(|e| e.name.as_deref() == Some("content_block_delta"))
            .collect();
        // coalesced into a single input_json_delta
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].data["delta"]["partial_json"], "{\"a\":1}");
        let stops = events
            .iter()
            .filter(|e| e.name.as_deref() == Some("message_delta"))
            .count();
        assert_eq!(stops, 1);
        assert_eq!(
            events.last().unwrap().name.as_deref(),
            Some("message_stop")
        );
    }

    #[test]
    fn abrupt_close_still_terminates_once() {
        let mut state = ChatToAnthropicStream::new();
        state.push(&json!({"id": "c", "model": "m", "choices": [{"delta": {"content": "x"}}]}));
        let tail = state.finish();
        assert_eq!(
            names(&tail),
            vec!["content_block_stop", "message_delta", "message_stop"]
        );
        assert!(state.finish().is_empty());
    }
}
