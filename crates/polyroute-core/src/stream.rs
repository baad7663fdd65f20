use std::time::Duration;

use bytes::Bytes;
use polyroute_codec::{ClientEvent, StreamCodec, UpstreamEvent};
use polyroute_protocol::{Protocol, SseParser, frame_data, frame_done, frame_event};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Coalescing window for buffered tool-argument deltas.
const FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// Drives one streaming response: reads upstream SSE, feeds the stream
/// codec, frames client events per the entry protocol, and guarantees
/// exactly one terminal (protocol DONE or an error frame) per response.
pub struct StreamingManager {
    idle_timeout: Duration,
}

impl StreamingManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }

    pub fn spawn(
        &self,
        mut upstream: mpsc::Receiver<Bytes>,
        mut codec: StreamCodec,
        entry: Protocol,
        request_id: String,
    ) -> mpsc::Receiver<Bytes> {
        let idle_timeout = self.idle_timeout;
        let (tx, rx) = mpsc::channel::<Bytes>(32);

        tokio::spawn(async move {
            let mut writer = EventWriter {
                tx,
                entry,
                saw_anthropic_terminal: false,
                client_gone: false,
            };
            let mut parser = SseParser::new();
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            let mut deadline = Instant::now() + idle_timeout;
            let mut done_marker = false;

            'read: loop {
                tokio::select! {
                    maybe_chunk = upstream.recv() => {
                        let Some(chunk) = maybe_chunk else {
                            break 'read;
                        };
                        deadline = Instant::now() + idle_timeout;
                        for event in parser.feed(&chunk) {
                            if event.is_done_marker() {
                                done_marker = true;
                                break 'read;
                            }
                            push_event(&mut codec, &mut writer, event.event, &event.data).await;
                            if writer.client_gone {
                                return;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        writer.write_all(codec.flush_pending()).await;
                        if writer.client_gone {
                            return;
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        tracing::warn!(request_id, "stream idle timeout, aborting");
                        writer.write_error("stream idle timeout").await;
                        return;
                    }
                }
            }

            // Drain a trailing event the upstream never terminated, then let
            // the codec close any open blocks.
            if !done_marker {
                for event in parser.finish() {
                    if event.is_done_marker() {
                        break;
                    }
                    push_event(&mut codec, &mut writer, event.event, &event.data).await;
                    if writer.client_gone {
                        return;
                    }
                }
            }
            writer.write_all(codec.finish()).await;
            writer.write_terminal().await;
            tracing::debug!(request_id, "stream complete");
        });

        rx
    }
}

async fn push_event(
    codec: &mut StreamCodec,
    writer: &mut EventWriter,
    name: Option<String>,
    data: &str,
) {
    if data.trim().is_empty() {
        return;
    }
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(error = %err, "skipping non-json sse event");
            return;
        }
    };
    let events = codec.push(UpstreamEvent { name, data: value });
    writer.write_all(events).await;
}

struct EventWriter {
    tx: mpsc::Sender<Bytes>,
    entry: Protocol,
    saw_anthropic_terminal: bool,
    client_gone: bool,
}

impl EventWriter {
    async fn write_all(&mut self, events: Vec<ClientEvent>) {
        for event in events {
            if self.client_gone {
                return;
            }
            if event.name.as_deref() == Some("message_stop") {
                self.saw_anthropic_terminal = true;
            }
            let data = event.data.to_string();
            let frame = match &event.name {
                Some(name) => frame_event(name, &data),
                None => frame_data(&data),
            };
            if self.tx.send(frame).await.is_err() {
                self.client_gone = true;
            }
        }
    }

    /// Success terminal, exactly once per response.
    async fn write_terminal(&mut self) {
        if self.client_gone {
            return;
        }
        match self.entry {
            Protocol::OpenaiChat | Protocol::OpenaiResponses => {
                let _ = self.tx.send(frame_done()).await;
            }
            Protocol::AnthropicMessages => {
                if !self.saw_anthropic_terminal {
                    self.write_error("upstream closed before message_stop").await;
                }
            }
            Protocol::GeminiChat => {}
        }
    }

    /// Error terminal (idle timeout, abrupt close), protocol-appropriate.
    async fn write_error(&mut self, message: &str) {
        if self.client_gone {
            return;
        }
        match self.entry {
            Protocol::OpenaiChat | Protocol::OpenaiResponses => {
                let body = json!({
                    "error": {
                        "message": message,
                        "type": "server_error",
                        "code": "ERR_STREAM_ABORT",
                    }
                });
                let _ = self.tx.send(frame_data(&body.to_string())).await;
                let _ = self.tx.send(frame_done()).await;
            }
            Protocol::AnthropicMessages => {
                let body = json!({
                    "type": "error",
                    "error": {"type": "overloaded_error", "message": message},
                });
                self.saw_anthropic_terminal = true;
                let _ = self.tx.send(frame_event("error", &body.to_string())).await;
            }
            Protocol::GeminiChat => {}
        }
    }
}
