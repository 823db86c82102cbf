//! Incremental `text/event-stream` codec.

/// One dispatched event from an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event type, if the frame named one.
    pub event: Option<String>,
    /// Last event id seen on the stream.
    pub id: Option<String>,
    /// Event data; multiple `data:` lines are joined with `\n`.
    pub data: String,
}

/// Decodes an event stream that arrives in arbitrary chunks.
///
/// Chunk boundaries may fall anywhere, including inside a line or inside a
/// multi-byte character. Lines end with `\n` or `\r\n`. Comment lines (`:`)
/// are skipped and a frame without data is never dispatched.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    id: Option<String>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every frame it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let text = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            let line = text.strip_suffix('\r').unwrap_or(&text);

            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Returns true if a partial line or undispatched data is buffered.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty() || !self.data.is_empty()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // retry hints are ignored; reconnection has its own policy
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }

        let data = self.data.join("\n");
        self.data.clear();

        Some(SseFrame {
            event: self.event.take(),
            id: self.id.clone(),
            data,
        })
    }
}

/// Encodes `data` as one event-stream frame.
pub fn encode_data_frame(data: &str) -> String {
    if data.is_empty() {
        return "data: \n\n".to_string();
    }

    let mut frame = String::with_capacity(data.len() + 8);
    for line in data.lines() {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_single_frame() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: {\"key\":\"a\",\"value\":1}\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, r#"{"key":"a","value":1}"#);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn decodes_across_chunk_boundaries() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"da").is_empty());
        assert!(decoder.feed(b"ta: hel").is_empty());
        assert!(decoder.feed(b"lo\n").is_empty());
        assert!(decoder.has_partial());

        let frames = decoder.feed(b"\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "hello");
    }

    #[test]
    fn joins_multiline_data_and_skips_comments() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b": keepalive\nevent: update\nid: 7\ndata: one\ndata: two\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "one\ntwo");
        assert_eq!(frames[0].event.as_deref(), Some("update"));
        assert_eq!(frames[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn handles_crlf_and_empty_frames() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"\r\n\r\ndata: x\r\n\r\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn multibyte_split() {
        let payload = "data: caf\u{e9}\n\n".as_bytes();
        let split = payload.len() - 3; // inside the two-byte character

        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(&payload[..split]).is_empty());
        let frames = decoder.feed(&payload[split..]);
        assert_eq!(frames[0].data, "caf\u{e9}");
    }

    #[test]
    fn encode_frame() {
        assert_eq!(encode_data_frame(r#"{"connected": true}"#), "data: {\"connected\": true}\n\n");
        assert_eq!(encode_data_frame("a\nb"), "data: a\ndata: b\n\n");
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_frames(
            payloads in proptest::collection::vec("[a-z0-9{}\":,]{1,24}", 1..6),
            cut in 0usize..200,
        ) {
            let stream: String = payloads.iter().map(|p| encode_data_frame(p)).collect();
            let bytes = stream.as_bytes();
            let cut = cut.min(bytes.len());

            let mut decoder = SseDecoder::new();
            let mut frames = decoder.feed(&bytes[..cut]);
            frames.extend(decoder.feed(&bytes[cut..]));

            let data: Vec<String> = frames.into_iter().map(|f| f.data).collect();
            prop_assert_eq!(data, payloads);
        }
    }
}
