//! Line framing for streamed vendor responses.
//!
//! Both SSE bodies (`data: {...}` lines) and NDJSON bodies arrive as byte
//! chunks that do not align with line boundaries. `LineBuffer` accumulates
//! chunks and yields complete lines.

use memchr::memchr;

#[derive(Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete line with trailing whitespace trimmed, or `None` until
    /// more bytes arrive. Lines that are not valid UTF-8 are dropped.
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let line = match std::str::from_utf8(&self.buffer[..newline_pos]) {
                Ok(s) => Some(s.trim().to_string()),
                Err(e) => {
                    tracing::warn!("invalid UTF-8 in stream: {e}");
                    None
                }
            };
            self.buffer.drain(..=newline_pos);
            if let Some(line) = line {
                return Some(line);
            }
        }
        None
    }
}

/// Strip the SSE `data:` prefix, tolerating both `data: x` and `data:x`.
pub fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Condense a vendor error body into a single human-readable line. Vendors
/// disagree on where the message lives; try the common shapes before
/// falling back to the raw body.
pub fn error_summary(body: &str, status: u16) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {status} with empty body");
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let summary = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .or_else(|| {
                value.get("error").and_then(|v| match v {
                    serde_json::Value::String(s) => Some(s.clone()),
                    _ => None,
                })
            })
            .or_else(|| value.get("message").and_then(|v| v.as_str().map(str::to_owned)));
        if let Some(text) = summary {
            let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !collapsed.is_empty() {
                return format!("HTTP {status}: {collapsed}");
            }
        }
    }

    let mut snippet: String = trimmed.chars().take(300).collect();
    if snippet.len() < trimmed.len() {
        snippet.push('…');
    }
    format!("HTTP {status}: {snippet}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_reassembles_split_chunks() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"data: {\"a\":");
        assert!(buffer.next_line().is_none());
        buffer.push(b"1}\ndata: [DONE]\n");
        assert_eq!(buffer.next_line().as_deref(), Some("data: {\"a\":1}"));
        assert_eq!(buffer.next_line().as_deref(), Some("data: [DONE]"));
        assert!(buffer.next_line().is_none());
    }

    #[test]
    fn line_buffer_trims_carriage_returns() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"data: hello\r\n");
        assert_eq!(buffer.next_line().as_deref(), Some("data: hello"));
    }

    #[test]
    fn extract_data_payload_handles_spacing_variants() {
        assert_eq!(extract_data_payload("data: x"), Some("x"));
        assert_eq!(extract_data_payload("data:x"), Some("x"));
        assert_eq!(extract_data_payload("event: done"), None);
    }

    #[test]
    fn error_summary_prefers_nested_error_message() {
        let body = r#"{"error":{"message":"model   overloaded","type":"overloaded_error"}}"#;
        assert_eq!(error_summary(body, 429), "HTTP 429: model overloaded");
    }

    #[test]
    fn error_summary_handles_string_error_and_plaintext() {
        assert_eq!(
            error_summary(r#"{"error":"no such model"}"#, 404),
            "HTTP 404: no such model"
        );
        assert_eq!(error_summary("gateway exploded", 502), "HTTP 502: gateway exploded");
        assert_eq!(error_summary("", 500), "HTTP 500 with empty body");
    }
}
