//! Line decoder for server-sent-event streams.
//!
//! Both providers stream `data: {...}` lines. OpenAI-compatible endpoints end
//! with `data: [DONE]`; Qianfan marks the last event with `"is_end": true` and
//! reports errors as a bare JSON object without the `data:` prefix, which is
//! surfaced as [`SseItem::Bare`].

use serde_json::Value;

/// One decoded JSON payload from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseItem {
    /// Payload of a `data:` line.
    Data(Value),
    /// A JSON object line without the `data:` prefix.
    Bare(Value),
}

impl SseItem {
    pub fn value(&self) -> &Value {
        match self {
            SseItem::Data(v) | SseItem::Bare(v) => v,
        }
    }
}

/// Buffers bytes across network chunk boundaries and yields complete items.
///
/// ```
/// use llm_tasks::backend::sse::{SseDecoder, SseItem};
///
/// let mut decoder = SseDecoder::default();
/// assert!(decoder.push(b"data: {\"result\":\"\xe4\xbd").is_empty());
/// let items = decoder.push(b"\xa0\"}\n\ndata: [DONE]\n\n");
/// assert_eq!(items.len(), 1);
/// assert_eq!(items[0].value()["result"], "你");
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    // Raw bytes are kept until a full line arrives so multi-byte UTF-8
    // sequences split across chunks decode correctly.
    pending: Vec<u8>,
}

impl SseDecoder {
    /// Feed a network chunk; returns every item completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseItem> {
        self.pending.extend_from_slice(chunk);
        let mut items = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(item) = decode_line(&String::from_utf8_lossy(&line)) {
                items.push(item);
            }
        }
        items
    }

    /// Decode whatever remains once the stream has closed.
    pub fn finish(&mut self) -> Vec<SseItem> {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest)
            .lines()
            .filter_map(decode_line)
            .collect()
    }
}

fn decode_line(line: &str) -> Option<SseItem> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') || line.starts_with("event:") || line.starts_with("id:") {
        return None;
    }
    if let Some(data) = line.strip_prefix("data:") {
        let data = data.trim();
        if data == "[DONE]" {
            return None;
        }
        return serde_json::from_str(data).ok().map(SseItem::Data);
    }
    if line.starts_with('{') {
        return serde_json::from_str(line).ok().map(SseItem::Bare);
    }
    None
}
