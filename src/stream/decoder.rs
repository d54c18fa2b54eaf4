use super::event::ServerEvent;
use serde_json::Value;
use tracing::{debug, warn};

/// Incremental decoder for the `event:`/`data:` line framing.
///
/// Bytes are buffered until a full `\n`-terminated line is available, so a
/// line (or a multi-byte character) split across network reads is only
/// parsed once it is complete.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event_type: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk, returning every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.handle_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Called at end of stream. A trailing unterminated line is dropped.
    pub fn finish(&mut self) {
        if !self.buf.is_empty() {
            debug!("Discarding {} bytes of unterminated stream data", self.buf.len());
            self.buf.clear();
        }
        self.event_type = None;
    }

    fn handle_line(&mut self, line: &str) -> Option<ServerEvent> {
        if line.is_empty() {
            self.event_type = None;
            return None;
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => {
                let value = value.trim();
                self.event_type = (!value.is_empty()).then(|| value.to_string());
                None
            }
            "data" => parse_data(value, self.event_type.as_deref()),
            _ => None,
        }
    }
}

fn parse_data(raw: &str, fallback_type: Option<&str>) -> Option<ServerEvent> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let payload: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("Dropping malformed stream payload: {}", e);
            return None;
        }
    };
    let Value::Object(mut obj) = payload else {
        warn!("Dropping non-object stream payload");
        return None;
    };

    let event_type = take_str(&mut obj, "type").or_else(|| fallback_type.map(String::from));
    let Some(event_type) = event_type else {
        warn!("Dropping stream payload without an event type");
        return None;
    };
    let timestamp = match obj.remove("timestamp") {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let agent_name = take_str(&mut obj, "agent_name");
    let tool_name = take_str(&mut obj, "tool_name");
    let data = match obj.remove("data") {
        Some(data) => data,
        None => Value::Object(obj),
    };

    Some(ServerEvent {
        event_type,
        timestamp,
        agent_name,
        tool_name,
        data,
    })
}

fn take_str(obj: &mut serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            obj.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_line_supplies_type() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: agent_start\ndata: {\"data\":{\"agent_name\":\"A\"}}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "agent_start");
        assert_eq!(events[0].data, json!({"agent_name": "A"}));
    }

    #[test]
    fn test_payload_type_wins_over_event_line() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b"event: message\ndata: {\"type\":\"llm_chunk\",\"agent_name\":\"A\",\"content\":\"hi\"}\n\n",
        );
        assert_eq!(events[0].event_type, "llm_chunk");
        assert_eq!(events[0].agent_name.as_deref(), Some("A"));
        assert_eq!(events[0].data, json!({"content": "hi"}));
    }

    #[test]
    fn test_partial_lines_are_reassembled() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"llm_ch").is_empty());
        assert!(decoder.push(b"unk\",\"content\":\"caf\xC3").is_empty());
        let events = decoder.push(b"\xA9\"}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, json!({"content": "café"}));
    }

    #[test]
    fn test_malformed_payload_does_not_stop_decoding() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b"data: {\"type\":\"agent_start\"}\n\ndata: {not json\n\n: keepalive\nid: 7\ndata: {\"type\":\"agent_complete\"}\n\n",
        );
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["agent_start", "agent_complete"]);
    }

    #[test]
    fn test_blank_line_resets_event_type() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: complete\n\ndata: {\"message_id\":\"m1\"}\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_multiple_data_lines_parse_independently() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(
            b"event: llm_chunk\ndata: {\"content\":\"a\"}\ndata: {\"content\":\"ab\"}\n\n",
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data, json!({"content": "ab"}));
    }

    #[test]
    fn test_finish_drops_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"complete\"}").is_empty());
        decoder.finish();
        assert!(decoder.push(b"\n").is_empty());
    }
}
