use polyroute_protocol::Protocol;
use serde_json::Value;

use crate::anthropic2chat::stream::ChatToAnthropicStream;
use crate::chat2anthropic::stream::AnthropicToChatStream;
use crate::chat2gemini::stream::GeminiToChatStream;
use crate::chat2responses::stream::ResponsesToChatStream;
use crate::responses2chat::stream::ChatToResponsesStream;
use crate::{CodecCtx, CodecError};

/// One SSE event read from the upstream (already JSON-decoded).
#[derive(Debug, Clone)]
pub struct UpstreamEvent {
    pub name: Option<String>,
    pub data: Value,
}

/// One event to emit to the client. `name` is set for protocols with typed
/// events (anthropic, responses); openai-chat frames are plain `data:` lines.
#[derive(Debug, Clone)]
pub struct ClientEvent {
    pub name: Option<String>,
    pub data: Value,
}

impl ClientEvent {
    pub fn named(name: &str, data: Value) -> Self {
        Self {
            name: Some(name.to_string()),
            data,
        }
    }

    pub fn bare(data: Value) -> Self {
        Self { name: None, data }
    }
}

/// Provider events normalized into canonical openai-chat chunks.
enum ProviderStage {
    Chat,
    Anthropic(AnthropicToChatStream),
    Responses(ResponsesToChatStream),
    Gemini(GeminiToChatStream),
}

/// Canonical chat chunks lifted into the entry protocol's events.
enum EntryStage {
    Chat,
    Anthropic(ChatToAnthropicStream),
    Responses(ChatToResponsesStream),
}

/// Streaming translator for one response: pushes upstream events through a
/// provider-normalizing stage and an entry-lifting stage. When both sides
/// speak the same protocol the codec is a passthrough.
pub struct StreamCodec {
    provider: ProviderStage,
    entry: EntryStage,
    passthrough: bool,
}

impl StreamCodec {
    pub fn new(entry: Protocol, provider: Protocol, ctx: &CodecCtx) -> Result<Self, CodecError> {
        if entry == Protocol::GeminiChat {
            return Err(CodecError::UnsupportedPair { entry, provider });
        }
        if entry == provider {
            return Ok(Self {
                provider: ProviderStage::Chat,
                entry: EntryStage::Chat,
                passthrough: true,
            });
        }
        let provider_stage = match provider {
            Protocol::OpenaiChat => ProviderStage::Chat,
            Protocol::AnthropicMessages => {
                ProviderStage::Anthropic(AnthropicToChatStream::new(ctx.unix_time))
            }
            Protocol::OpenaiResponses => {
                ProviderStage::Responses(ResponsesToChatStream::new(ctx.unix_time))
            }
            Protocol::GeminiChat => {
                ProviderStage::Gemini(GeminiToChatStream::new(&ctx.request_id, ctx.unix_time))
            }
        };
        let entry_stage = match entry {
            Protocol::OpenaiChat => EntryStage::Chat,
            Protocol::AnthropicMessages => EntryStage::Anthropic(ChatToAnthropicStream::new()),
            Protocol::OpenaiResponses => {
                EntryStage::Responses(ChatToResponsesStream::new(ctx.unix_time))
            }
            Protocol::GeminiChat => unreachable!("gemini entry rejected above"),
        };
        Ok(Self {
            provider: provider_stage,
            entry: entry_stage,
            passthrough: false,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    pub fn push(&mut self, event: UpstreamEvent) -> Vec<ClientEvent> {
        if self.passthrough {
            return vec![ClientEvent {
                name: event.name,
                data: event.data,
            }];
        }
        let chunks = match &mut self.provider {
            ProviderStage::Chat => vec![event.data],
            ProviderStage::Anthropic(state) => state.push(&event),
            ProviderStage::Responses(state) => state.push(&event),
            ProviderStage::Gemini(state) => state.push(&event),
        };
        self.lift(chunks)
    }

    /// Drain any coalescing buffers (called on the manager's flush tick).
    pub fn flush_pending(&mut self) -> Vec<ClientEvent> {
        match &mut self.entry {
            EntryStage::Anthropic(state) => state.flush_pending(),
            _ => Vec::new(),
        }
    }

    /// Terminal drain: close whatever the upstream left open. The streaming
    /// manager calls this exactly once per response.
    pub fn finish(&mut self) -> Vec<ClientEvent> {
        if self.passthrough {
            return Vec::new();
        }
        let chunks = match &mut self.provider {
            ProviderStage::Chat => Vec::new(),
            ProviderStage::Anthropic(state) => state.finish(),
            ProviderStage::Responses(state) => state.finish(),
            ProviderStage::Gemini(state) => state.finish(),
        };
        let mut events = self.lift(chunks);
        events.extend(match &mut self.entry {
            EntryStage::Chat => Vec::new(),
            EntryStage::Anthropic(state) => state.finish(),
            EntryStage::Responses(state) => state.finish(),
        });
        events
    }

    fn lift(&mut self, chunks: Vec<Value>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        for chunk in chunks {
            match &mut self.entry {
                EntryStage::Chat => events.push(ClientEvent::bare(chunk)),
                EntryStage::Anthropic(state) => events.extend(state.push(&chunk)),
                EntryStage::Responses(state) => events.extend(state.push(&chunk)),
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> CodecCtx {
        CodecCtx::new("req_s", 1700)
    }

    #[test]
    fn chat_to_anthropic_stream_matches_expected_sequence() {
        let mut codec = StreamCodec::new(
            Protocol::AnthropicMessages,
            Protocol::OpenaiChat,
            &ctx(),
        )
        .unwrap();
        let mut events = Vec::new();
        for chunk in [
            json!({"id": "c", "model": "m", "choices": [{"delta": {"content": "Hel"}}]}),
            json!({"choices": [{"delta": {"content": "lo"}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
        ] {
            events.extend(codec.push(UpstreamEvent {
                name: None,
                data: chunk,
            }));
        }
        let names: Vec<&str> = events
            .iter()
            .map(|event| event.name.as_deref().unwrap_or(""))
            .collect();
        assert_eq!(
            names,
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
        assert!(codec.finish().is_empty());
    }

    #[test]
    fn anthropic_to_responses_composes_through_chat() {
        let mut codec = StreamCodec::new(
            Protocol::OpenaiResponses,
            Protocol::AnthropicMessages,
            &ctx(),
        )
        .unwrap();
        let mut events = Vec::new();
        for (name, data) in [
            (
                "message_start",
                json!({"type": "message_start", "message": {"id": "m1", "model": "claude"}}),
            ),
            (
                "content_block_start",
                json!({"index": 0, "content_block": {"type": "text", "text": ""}}),
            ),
            (
                "content_block_delta",
                json!({"index": 0, "delta": {"type": "text_delta", "text": "hey"}}),
            ),
            ("message_delta", json!({"delta": {"stop_reason": "end_turn"}})),
            ("message_stop", json!({})),
        ] {
            events.extend(codec.push(UpstreamEvent {
                name: Some(name.to_string()),
                data,
            }));
        }
        let kinds: Vec<&str> = events
            .iter()
            .filter_map(|event| event.name.as_deref())
            .collect();
        assert!(kinds.contains(&"response.created"));
        assert!(kinds.contains(&"response.output_text.delta"));
        assert!(kinds.contains(&"response.completed"));
    }

    #[test]
    fn passthrough_forwards_unchanged() {
        let mut codec =
            StreamCodec::new(Protocol::OpenaiChat, Protocol::OpenaiChat, &ctx()).unwrap();
        assert!(codec.is_passthrough());
        let out = codec.push(UpstreamEvent {
            name: None,
            data: json!({"choices": []}),
        });
        assert_eq!(out.len(), 1);
        assert!(codec.finish().is_empty());
    }

    #[test]
    fn gemini_entry_is_rejected() {
        assert!(StreamCodec::new(Protocol::GeminiChat, Protocol::OpenaiChat, &ctx()).is_err());
    }
}
