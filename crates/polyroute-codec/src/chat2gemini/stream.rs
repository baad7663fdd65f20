use serde_json::{Value, json};

use crate::stream::UpstreamEvent;

/// Streaming converter: gemini streamGenerateContent chunks in, openai-chat
/// chunks out. Gemini sends whole functionCall parts, never partial JSON, so
/// each one becomes a complete tool-call delta.
#[derive(Debug)]
pub struct GeminiToChatStream {
    request_id: String,
    created: i64,
    role_sent: bool,
    next_tool_index: i64,
    finish_emitted: bool,
    saw_tool_call: bool,
    pending_finish: Option<&'static str>,
}

impl GeminiToChatStream {
    pub fn new(request_id: impl Into<String>, created: i64) -> Self {
        Self {
            request_id: request_id.into(),
            created,
            role_sent: false,
            next_tool_index: 0,
            finish_emitted: false,
            saw_tool_call: false,
            pending_finish: None,
        }
    }

    pub fn push(&mut self, event: &UpstreamEvent) -> Vec<Value> {
        let mut chunks = Vec::new();
        if self.finish_emitted {
            return chunks;
        }

        if !self.role_sent {
            self.role_sent = true;
            chunks.push(self.chunk(json!({"role": "assistant"}), None));
        }

        let candidate = event
            .data
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .cloned()
            .unwrap_or(json!({}));

        if let Some(parts) = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str)
                    && !text.is_empty()
                {
                    chunks.push(self.chunk(json!({"content": text}), None));
                }
                if let Some(call) = part.get("functionCall") {
                    self.saw_tool_call = true;
                    let index = self.next_tool_index;
                    self.next_tool_index += 1;
                    let args = call.get("args").cloned().unwrap_or(json!({}));
                    let arguments =
                        serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string());
                    chunks.push(self.chunk(
                        json!({"tool_calls": [{
                            "index": index,
                            "id": format!("call_{}_{index}", self.request_id),
                            "type": "function",
                            "function": {
                                "name": call.get("name").cloned().unwrap_or(json!("")),
                                "arguments": arguments,
                            }
                        }]}),
                        None,
                    ));
                }
            }
        }

        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            self.pending_finish = Some(match reason {
                "MAX_TOKENS" => "length",
                "SAFETY" | "RECITATION" => "content_filter",
                _ => "stop",
            });
            chunks.extend(self.finish());
        }

        chunks
    }

    pub fn finish(&mut self) -> Vec<Value> {
        if self.finish_emitted {
            return Vec::new();
        }
        self.finish_emitted = true;
        let reason = if self.saw_tool_call {
            "tool_calls"
        } else {
            self.pending_finish.unwrap_or("stop")
        };
        vec![self.chunk(json!({}), Some(reason))]
    }

    fn chunk(&self, delta: Value, finish: Option<&str>) -> Value {
        json!({
            "id": format!("chatcmpl_{}", self.request_id),
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": "",
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish,
            }]
        })
    }
}
