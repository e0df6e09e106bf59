//! Server-sent event codec.
//!
//! [`SseParser`] turns raw stream bytes, split at arbitrary points, into
//! [`SseEvent`] values. [`encode`] is its inverse and produces the exact wire
//! form the gateway writes to clients.

use serde_json::Value;

/// Payload carried by the `data:` line(s) of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum SseData {
    /// The `[DONE]` stream terminator.
    Done,
    /// A JSON payload.
    Json(Value),
    /// A payload that is not valid JSON, kept verbatim.
    Raw(String),
}

impl SseData {
    fn from_payload(payload: &str) -> Self {
        if payload.trim() == "[DONE]" {
            return SseData::Done;
        }

        match serde_json::from_str(payload) {
            Ok(value) => SseData::Json(value),
            Err(_) => SseData::Raw(payload.to_string()),
        }
    }

    fn to_payload(&self) -> String {
        match self {
            SseData::Done => "[DONE]".to_string(),
            SseData::Json(value) => value.to_string(),
            SseData::Raw(text) => text.clone(),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            SseData::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub retry: Option<u64>,
    pub data: SseData,
}

impl SseEvent {
    /// Named event with a JSON payload.
    pub fn json(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: Some(event.into()),
            id: None,
            retry: None,
            data: SseData::Json(data),
        }
    }

    /// The `data: [DONE]` sentinel.
    pub fn done() -> Self {
        Self {
            event: None,
            id: None,
            retry: None,
            data: SseData::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        self.data == SseData::Done
    }

    pub fn encode(&self) -> String {
        encode(self)
    }
}

/// Serialize an event to its wire form, terminated by a blank line.
pub fn encode(event: &SseEvent) -> String {
    let mut out = String::new();

    if let Some(name) = &event.event {
        out.push_str("event: ");
        out.push_str(name);
        out.push('\n');
    }
    if let Some(id) = &event.id {
        out.push_str("id: ");
        out.push_str(id);
        out.push('\n');
    }
    if let Some(retry) = event.retry {
        out.push_str(&format!("retry: {}\n", retry));
    }

    // Multi-line payloads become one `data:` line per line.
    for line in event.data.to_payload().split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }

    out.push('\n');
    out
}

#[derive(Debug, Default)]
struct PendingEvent {
    event: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
    data: Vec<String>,
}

impl PendingEvent {
    fn take(&mut self) -> Option<SseEvent> {
        let pending = std::mem::take(self);
        // A block without any `data:` line dispatches nothing.
        if pending.data.is_empty() {
            return None;
        }

        Some(SseEvent {
            event: pending.event,
            id: pending.id,
            retry: pending.retry,
            data: SseData::from_payload(&pending.data.join("\n")),
        })
    }
}

/// Incremental SSE parser.
///
/// Keeps the incomplete trailing line and the partially assembled event
/// across calls, so chunk boundaries may fall anywhere, including inside a
/// multi-byte UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    pending: PendingEvent,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event completed by this chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let decoded = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = decoded.strip_suffix('\r').unwrap_or(&decoded);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        events
    }

    pub fn feed_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.feed(chunk.as_bytes())
    }

    /// Flush whatever is left once the underlying stream has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let decoded = String::from_utf8_lossy(&raw);
            let line = decoded.strip_suffix('\r').unwrap_or(&decoded);
            if let Some(event) = self.process_line(line) {
                return Some(event);
            }
        }

        self.pending.take()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.pending.take();
        }

        // Comment / keep-alive line
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.pending.event = Some(value.to_string()),
            "data" => self.pending.data.push(value.to_string()),
            "id" => self.pending.id = Some(value.to_string()),
            "retry" => match value.trim().parse::<u64>() {
                Ok(retry) => self.pending.retry = Some(retry),
                Err(_) => tracing::trace!("ignoring invalid retry value: {}", value),
            },
            other => tracing::trace!("ignoring unknown SSE field: {}", other),
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(text: &str) -> Vec<SseEvent> {
        let mut parser = SseParser::new();
        let mut events = parser.feed_str(text);
        events.extend(parser.finish());
        events
    }

    #[test]
    fn test_parses_named_json_event() {
        let events = decode_all("event: message_start\ndata: {\"type\":\"message_start\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, SseData::Json(json!({"type": "message_start"})));
    }

    #[test]
    fn test_arbitrary_chunk_boundaries() {
        let wire = "data: {\"a\":1}\n\ndata: {\"b\":2}\n\ndata: [DONE]\n\n";
        let mut parser = SseParser::new();
        let mut events = Vec::new();
        for byte in wire.as_bytes() {
            events.extend(parser.feed(std::slice::from_ref(byte)));
        }

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].data, SseData::Json(json!({"a": 1})));
        assert_eq!(events[1].data, SseData::Json(json!({"b": 2})));
        assert!(events[2].is_done());
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let wire = "data: {\"text\":\"héllo\"}\n\n".as_bytes();
        let split = wire.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut parser = SseParser::new();
        assert!(parser.feed(&wire[..split]).is_empty());
        let events = parser.feed(&wire[split..]);
        assert_eq!(events[0].data, SseData::Json(json!({"text": "héllo"})));
    }

    #[test]
    fn test_non_json_payload_is_kept_raw() {
        let events = decode_all("data: not json at all\n\n");
        assert_eq!(events[0].data, SseData::Raw("not json at all".to_string()));
    }

    #[test]
    fn test_comments_crlf_and_retry() {
        let events = decode_all(": keep-alive\r\nid: 7\r\nretry: 1500\r\ndata: {}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].retry, Some(1500));
        assert_eq!(events[0].data, SseData::Json(json!({})));
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let events = decode_all("data: first\ndata: second\n\n");
        assert_eq!(events[0].data, SseData::Raw("first\nsecond".to_string()));
    }

    #[test]
    fn test_trailing_event_without_blank_line_is_flushed() {
        let events = decode_all("event: ping\ndata: {}");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("ping"));
    }

    #[test]
    fn test_blocks_without_data_dispatch_nothing() {
        let events = decode_all("event: ping\n\nid: 3\n\nretry: 3000\n\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, None);
        assert_eq!(events[0].id, None);
        assert_eq!(events[0].data, SseData::Json(json!({"a": 1})));

        assert!(decode_all("event: ping\n").is_empty());
    }

    #[test]
    fn test_encode_exact_wire_form() {
        let event = SseEvent::json("ping", json!({"type": "ping"}));
        assert_eq!(event.encode(), "event: ping\ndata: {\"type\":\"ping\"}\n\n");
        assert_eq!(SseEvent::done().encode(), "data: [DONE]\n\n");
    }

    #[test]
    fn test_decode_inverts_encode() {
        let events = vec![
            SseEvent::json("message_delta", json!({"delta": {"stop_reason": "end_turn"}})),
            SseEvent::done(),
            SseEvent {
                event: Some("note".to_string()),
                id: Some("42".to_string()),
                retry: Some(3000),
                data: SseData::Raw("line one\nline two".to_string()),
            },
        ];

        let wire: String = events.iter().map(encode).collect();
        assert_eq!(decode_all(&wire), events);
    }
}
