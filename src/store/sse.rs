// Server-sent event parsing for streaming subscriptions

use serde::Deserialize;
use serde_json::Value;

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental line-oriented parser
///
/// Feed lines without their terminator; an event is emitted on the blank line
/// that ends it.
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None; // comment
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {} // id, retry and unknown fields are not used
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Payload of `put` and `patch` events
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamPayload {
    pub path: String,
    pub data: Value,
}

/// What the realtime database streamed, decoded
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Put(StreamPayload),
    Patch(StreamPayload),
    KeepAlive,
    /// Security rules no longer allow reading the location
    Cancel(String),
    AuthRevoked,
    Unknown(String),
}

impl StreamEvent {
    pub fn decode(raw: &SseEvent) -> Result<Self, serde_json::Error> {
        Ok(match raw.event.as_str() {
            "put" => StreamEvent::Put(serde_json::from_str(&raw.data)?),
            "patch" => StreamEvent::Patch(serde_json::from_str(&raw.data)?),
            "keep-alive" => StreamEvent::KeepAlive,
            "cancel" => StreamEvent::Cancel(raw.data.clone()),
            "auth_revoked" => StreamEvent::AuthRevoked,
            other => StreamEvent::Unknown(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_all(text: &str) -> Vec<SseEvent> {
        let mut parser = SseParser::new();
        text.lines().filter_map(|line| parser.feed_line(line)).collect()
    }

    #[test]
    fn test_parse_put_event() {
        let events = parse_all("event: put\ndata: {\"path\":\"/\",\"data\":null}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "put");

        let decoded = StreamEvent::decode(&events[0]).unwrap();
        assert_eq!(
            decoded,
            StreamEvent::Put(StreamPayload {
                path: "/".to_string(),
                data: Value::Null
            })
        );
    }

    #[test]
    fn test_parse_multiple_events_and_comments() {
        let text = concat!(
            ": hello\n",
            "event: keep-alive\n",
            "data: null\n",
            "\n",
            "event: patch\r\n",
            "data: {\"path\":\"/k1\",\"data\":{\"name\":\"Run\"}}\r\n",
            "\r\n",
        );
        let events = parse_all(text);
        assert_eq!(events.len(), 2);
        assert_eq!(StreamEvent::decode(&events[0]).unwrap(), StreamEvent::KeepAlive);
        match StreamEvent::decode(&events[1]).unwrap() {
            StreamEvent::Patch(payload) => {
                assert_eq!(payload.path, "/k1");
                assert_eq!(payload.data, json!({"name": "Run"}));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let events = parse_all("data: a\ndata: b\n\n");
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn test_blank_lines_without_event_emit_nothing() {
        assert!(parse_all("\n\n\n").is_empty());
    }

    #[test]
    fn test_decode_control_events() {
        let cancel = SseEvent {
            event: "cancel".to_string(),
            data: "Permission denied".to_string(),
        };
        assert_eq!(
            StreamEvent::decode(&cancel).unwrap(),
            StreamEvent::Cancel("Permission denied".to_string())
        );

        let revoked = SseEvent {
            event: "auth_revoked".to_string(),
            data: "credential is no longer valid".to_string(),
        };
        assert_eq!(StreamEvent::decode(&revoked).unwrap(), StreamEvent::AuthRevoked);

        let bad = SseEvent {
            event: "put".to_string(),
            data: "{".to_string(),
        };
        assert!(StreamEvent::decode(&bad).is_err());
    }
}
