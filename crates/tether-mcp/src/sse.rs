//! Server-Sent Events (SSE) parser.
//!
//! Parses raw bytes from an HTTP response into SSE events according to
//! the W3C EventSource specification. Tolerates CRLF line endings and
//! applies the default `message` event type, both of which remote MCP
//! servers produce in the wild.

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone)]
pub struct SseEvent {
    /// Event type; `message` when the stream did not name one.
    pub event: String,
    pub data: String,
}

/// Incremental SSE parser that processes bytes into events.
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed a chunk of text and return any complete events.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        // Event blocks end at a blank line, in either line-ending convention.
        while let Some((end, sep_len)) = find_block_end(&self.buffer) {
            let block = self.buffer[..end].to_string();
            self.buffer = self.buffer[end + sep_len..].to_string();

            if let Some(event) = Self::parse_block(&block) {
                events.push(event);
            }
        }

        events
    }

    /// Parse a single SSE block (lines between blank lines) into an event.
    fn parse_block(block: &str) -> Option<SseEvent> {
        let mut event_type = None;
        let mut data_lines = Vec::new();

        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if line.starts_with(':') {
                // Comment line, skip
                continue;
            }

            if let Some((field, value)) = line.split_once(':') {
                // Trim leading space from value per SSE spec
                let value = value.strip_prefix(' ').unwrap_or(value);
                match field {
                    "event" => event_type = Some(value.to_string()),
                    "data" => data_lines.push(value.to_string()),
                    _ => {} // Ignore unknown fields
                }
            } else if line == "data" {
                // Field with no value
                data_lines.push(String::new());
            }
        }

        if data_lines.is_empty() {
            return None;
        }

        Some(SseEvent {
            event: event_type.unwrap_or_else(|| "message".to_string()),
            data: data_lines.join("\n"),
        })
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the first blank-line separator, returning its offset and width.
fn find_block_end(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|pos| (pos, 2));
    let crlf = buffer.find("\r\n\r\n").map(|pos| (pos, 4));
    match (lf, crlf) {
        (Some(lf), Some(crlf)) => Some(if crlf.0 < lf.0 { crlf } else { lf }),
        (Some(found), None) | (None, Some(found)) => Some(found),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_event() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: endpoint\ndata: /messages?sessionId=abc\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/messages?sessionId=abc");
    }

    #[test]
    fn default_event_type_is_message() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: {\"jsonrpc\":\"2.0\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn multiple_events() {
        let mut parser = SseParser::new();
        let events =
            parser.feed("event: endpoint\ndata: /messages\n\nevent: message\ndata: {}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[1].event, "message");
    }

    #[test]
    fn partial_event_across_chunks() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: message\n");
        assert_eq!(events.len(), 0);
        let events = parser.feed("data: {}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn crlf_line_endings() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: message\r\ndata: {\"id\":1}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"id\":1}");
    }

    #[test]
    fn comment_lines_ignored() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keepalive\nevent: message\ndata: {}\n\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn multiline_data_joined() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: line1\ndata: line2\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn block_without_data_is_dropped() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: ping\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn data_with_leading_space() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: hello world\n\n");
        assert_eq!(events[0].data, "hello world");
    }
}
