//! Incremental parser for text/event-stream responses.
//!
//! Events are separated by a blank line and carry optional `event:` and one
//! or more `data:` fields. Chunks arrive at arbitrary byte boundaries, so the
//! parser buffers raw bytes until a full event is available; a multi-byte
//! character split across two reads must reassemble intact.

/// One parsed server-sent event
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    /// The `event:` field, when present
    pub name: Option<String>,

    /// The `data:` payload; multiple data lines are joined with `\n`
    pub data: String,
}

/// Stateful parser fed from a byte stream
#[derive(Default)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw response bytes; returns every event completed by this chunk
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, skip)) = find_event_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + skip).take(end).collect();
            if let Some(event) = parse_block(&block) {
                events.push(event);
            }
        }
        events
    }
}

/// Locate the first blank-line separator, returning (event length, separator length)
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn parse_block(block: &[u8]) -> Option<ServerEvent> {
    let text = String::from_utf8_lossy(block);

    let mut name: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("event:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // id:, retry: and ":" comment lines are ignored
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(ServerEvent {
        name,
        data: data_lines.join("\n"),
    })
}
