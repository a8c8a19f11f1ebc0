//! Push parser for server-sent event streams.
//!
//! Fed arbitrary byte chunks as they arrive off the wire; events are cut at
//! blank-line boundaries, so a JSON payload split across reads is
//! reassembled before it is surfaced.

/// One parsed event off the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// The payload of a `data:` line.
    Data(String),
    /// The payload of an `event: error` frame.
    Error(String),
    /// The `[DONE]` sentinel terminating a stream.
    Done,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        SseParser::default()
    }

    /// Absorb a chunk and return every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(boundary) = find_event_boundary(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..boundary.end).collect();
            let event = String::from_utf8_lossy(&raw[..boundary.start]).into_owned();
            if let Some(parsed) = parse_event(&event) {
                events.push(parsed);
            }
        }
        events
    }

    /// Whether bytes remain that never formed a complete event.
    pub fn has_partial(&self) -> bool {
        !self.buffer.iter().all(|b| b.is_ascii_whitespace())
    }
}

struct Boundary {
    start: usize,
    end: usize,
}

/// Position of the first blank-line separator, tolerating `\r\n` endings.
fn find_event_boundary(buffer: &[u8]) -> Option<Boundary> {
    let mut i = 0;
    while i < buffer.len() {
        if buffer[i] != b'\n' {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        if j < buffer.len() && buffer[j] == b'\r' {
            j += 1;
        }
        if j < buffer.len() && buffer[j] == b'\n' {
            let start = if i > 0 && buffer[i - 1] == b'\r' { i - 1 } else { i };
            return Some(Boundary { start, end: j + 1 });
        }
        i += 1;
    }
    None
}

fn parse_event(event: &str) -> Option<SseEvent> {
    let mut name: Option<&str> = None;
    for line in event.lines() {
        if let Some(n) = line.strip_prefix("event:") {
            name = Some(n.trim());
            continue;
        }
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);
        if name == Some("error") {
            return Some(SseEvent::Error(data.to_string()));
        }
        if data.trim() == "[DONE]" {
            return Some(SseEvent::Done);
        }
        return Some(SseEvent::Data(data.to_string()));
    }
    None
}
