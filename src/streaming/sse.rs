use bytes::{Buf, BytesMut};
use serde::Serialize;

pub const DONE: &str = "data: [DONE]\n\n";

/// One decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }
}

/// Incremental SSE decoder.
///
/// Upstream chunk boundaries fall anywhere, including inside a UTF-8 sequence
/// or between `\r` and `\n`, so bytes are buffered until a blank line closes
/// the event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Feed new data and extract complete events
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block = self.buffer.split_to(pos);
            self.buffer.advance(2);
            if let Some(event) = parse_block(&block) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        let block = self.buffer.split();
        parse_block(&block)
    }

    /// Check if there's buffered data
    pub fn has_buffered_data(&self) -> bool {
        !self.buffer.is_empty()
    }
}

fn parse_block(block: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(block);
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

/// `event: <name>` + `data: <json>` frame, the Claude and Codex wire format
pub fn format_event<T: Serialize>(name: &str, payload: &T) -> String {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    format!("event: {}\ndata: {}\n\n", name, data)
}

/// Bare `data: <json>` frame, the OpenAI wire format
pub fn format_data<T: Serialize>(payload: &T) -> String {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    format!("data: {}\n\n", data)
}

/// Format error as a Claude SSE event
pub fn format_claude_error(error_type: &str, message: &str) -> String {
    let data = serde_json::json!({
        "type": "error",
        "error": {
            "type": error_type,
            "message": message
        }
    });
    format!("event: error\ndata: {}\n\n", data)
}

/// Format error as an OpenAI-style SSE data frame
pub fn format_openai_error(error_type: &str, message: &str) -> String {
    let data = serde_json::json!({
        "error": {
            "message": message,
            "type": error_type,
            "code": null
        }
    });
    format!("data: {}\n\n", data)
}
