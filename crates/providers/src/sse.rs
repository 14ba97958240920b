//! Incremental parser for `text/event-stream` responses.
//!
//! The Gemini streaming endpoint (`alt=sse`) emits one JSON payload per
//! event as `data:` lines, events separated by a blank line. HTTP chunks
//! may split an event anywhere, so the parser buffers across feeds and
//! only yields complete payloads.

pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed raw response bytes; returns the `data:` payload of every event
    /// completed by this chunk. Multi-line data is rejoined with `\n`.
    /// Comment lines (`:`) and other fields (`id:`, `retry:`) are ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut payloads = Vec::new();
        loop {
            // Event boundary is a blank line, under either line discipline.
            let lf = self.buffer.find("\n\n");
            let crlf = self.buffer.find("\r\n\r\n");
            let (boundary, sep_len) = match (lf, crlf) {
                (Some(l), Some(c)) if c < l => (c, 4),
                (Some(l), _) => (l, 2),
                (None, Some(c)) => (c, 4),
                (None, None) => break,
            };
            let block: String = self.buffer.drain(..boundary + sep_len).collect();

            let mut data_lines: Vec<&str> = Vec::new();
            for line in block.lines() {
                let line = line.strip_suffix('\r').unwrap_or(line);
                if let Some(value) = line.strip_prefix("data:") {
                    data_lines.push(value.strip_prefix(' ').unwrap_or(value));
                }
            }
            if !data_lines.is_empty() {
                payloads.push(data_lines.join("\n"));
            }
        }
        payloads
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_consecutive_events() {
        let mut parser = SseParser::new();
        let payloads = parser.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(payloads, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[test]
    fn reassembles_events_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"text\":\"hel").is_empty());
        let payloads = parser.feed(b"lo\"}\n\n");
        assert_eq!(payloads, vec![r#"{"text":"hello"}"#]);
    }

    #[test]
    fn joins_multi_line_data() {
        let mut parser = SseParser::new();
        let payloads = parser.feed(b"data: line one\ndata: line two\n\n");
        assert_eq!(payloads, vec!["line one\nline two"]);
    }

    #[test]
    fn ignores_comments_and_other_fields() {
        let mut parser = SseParser::new();
        let payloads = parser.feed(b": keepalive\nid: 7\ndata: payload\n\n");
        assert_eq!(payloads, vec!["payload"]);
        assert!(parser.feed(b": lone comment\n\n").is_empty());
    }

    #[test]
    fn tolerates_crlf_line_endings() {
        let mut parser = SseParser::new();
        let payloads = parser.feed(b"data: one\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(payloads, vec!["one", "two"]);
    }
}
