use bytes::Bytes;

/// One parsed Server-Sent Event: optional `event:` name plus joined `data:`
/// payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is_done_marker(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental SSE decoder. Bytes arrive in arbitrary chunk boundaries; events
/// are emitted once their terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: String,
    event_name: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        // Non-UTF8 chunks are dropped; SSE is a text protocol.
        match std::str::from_utf8(chunk) {
            Ok(text) => self.feed_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn feed_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            self.consume_line(line, &mut out);
        }
        out
    }

    /// Flush a final event whose terminating blank line never arrived
    /// (upstream closed abruptly).
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            let line = line.trim_end_matches('\r').to_string();
            let mut ignored = Vec::new();
            self.consume_line(&line, &mut ignored);
        }
        let mut out = Vec::new();
        self.flush_event(&mut out);
        out
    }

    fn consume_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.flush_event(out);
            return;
        }
        if line.starts_with(':') {
            // comment / keep-alive frame
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                self.event_name = (!value.is_empty()).then(|| value.to_string());
            }
            "data" => self.data_lines.push(value.to_string()),
            // id/retry and unknown fields are ignored
            _ => {}
        }
    }

    fn flush_event(&mut self, out: &mut Vec<SseEvent>) {
        if self.event_name.is_none() && self.data_lines.is_empty() {
            return;
        }
        out.push(SseEvent {
            event: self.event_name.take(),
            data: self.data_lines.join("\n"),
        });
        self.data_lines.clear();
    }
}

/// `data: {json}\n\n` frame (OpenAI-style).
pub fn frame_data(data: &str) -> Bytes {
    Bytes::from(format!("data: {data}\n\n"))
}

/// `event: name\ndata: {json}\n\n` frame (Anthropic-style typed events).
pub fn frame_event(event: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}

/// OpenAI stream terminator.
pub fn frame_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed_str("data: {\"a\"").is_empty());
        let events = parser.feed_str(":1}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert!(events[1].is_done_marker());
    }

    #[test]
    fn typed_events_carry_names() {
        let mut parser = SseParser::new();
        let events = parser.feed_str("event: message_start\ndata: {}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn comments_and_crlf_are_tolerated() {
        let mut parser = SseParser::new();
        let events = parser.feed_str(": keep-alive\r\ndata: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn multi_line_data_joins_with_newline() {
        let mut parser = SseParser::new();
        let events = parser.feed_str("data: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn finish_flushes_truncated_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed_str("data: tail").is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tail");
    }

    #[test]
    fn frames_are_well_formed() {
        assert_eq!(frame_data("{}").as_ref(), b"data: {}\n\n");
        assert_eq!(
            frame_event("message_stop", "{}").as_ref(),
            b"event: message_stop\ndata: {}\n\n"
        );
        assert_eq!(frame_done().as_ref(), b"data: [DONE]\n\n");
    }
}
