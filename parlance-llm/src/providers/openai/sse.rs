//! Incremental server-sent-events decoder.
//!
//! Feeds arbitrary byte chunks, yields complete `data:` payloads. Only the
//! subset of SSE the chat-completions endpoints emit is handled: `data:`
//! lines separated by blank lines, with `[DONE]` as the terminator.

#[derive(Debug, Default)]
pub(super) struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the data payloads completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
            // Comment lines (":keepalive") and event names are ignored
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.feed(b"data: {\"a\":1}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"a\"").is_empty());
        let payloads = decoder.feed(b":1}\ndata: [DONE]\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn test_crlf_and_keepalives() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.feed(b": keepalive\r\ndata: x\r\n\r\n");
        assert_eq!(payloads, vec!["x".to_string()]);
    }
}
