use std::sync::Arc;

use bytes::Bytes;

use crate::models::{Event, EventId};

/// Comment frame written by the heartbeat driver.
pub const HEARTBEAT_FRAME: &str = ": heartbeat\n\n";

/// Fields of one SSE message. Absent fields are omitted from the output.
#[derive(Clone, Copy, Debug, Default)]
struct SseFields<'a> {
    id: Option<EventId>,
    event: Option<&'a str>,
    retry: Option<u64>,
    data: &'a str,
}

impl SseFields<'_> {
    fn encode(&self) -> Bytes {
        let mut out = String::with_capacity(self.data.len() + 32);
        if let Some(id) = self.id {
            out.push_str(&format!("id: {}\n", id));
        }
        if let Some(event) = self.event {
            out.push_str(&format!("event: {}\n", event));
        }
        if let Some(retry) = self.retry {
            out.push_str(&format!("retry: {}\n", retry));
        }
        for line in self.data.lines() {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Bytes::from(out)
    }
}

fn comment(text: &str) -> Bytes {
    Bytes::from(format!(": {}\n\n", text))
}

/// One encoded message ready for a connection sink.
///
/// Event frames remember which event they carry so a connection coming out of
/// replay can drop broadcasts it already received from the log.
#[derive(Clone, Debug)]
pub struct Frame {
    origin: Option<(EventId, Arc<str>)>,
    bytes: Bytes,
}

impl Frame {
    /// Encode an event. Replay and broadcast both go through here so the two
    /// paths produce identical bytes.
    pub fn event(event: &Event) -> Self {
        let data = event.payload.to_string();
        let fields = SseFields {
            id: Some(event.id),
            event: Some(event.event_type.as_str()),
            data: &data,
            ..SseFields::default()
        };
        Self {
            origin: Some((event.id, Arc::from(event.channel.as_str()))),
            bytes: fields.encode(),
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            origin: None,
            bytes: comment("heartbeat"),
        }
    }

    /// Reconnection delay hint sent once at the start of a stream.
    pub fn retry(retry_ms: u64) -> Self {
        Self {
            origin: None,
            bytes: SseFields {
                retry: Some(retry_ms),
                ..SseFields::default()
            }
            .encode(),
        }
    }

    pub fn event_id(&self) -> Option<EventId> {
        self.origin.as_ref().map(|(id, _)| *id)
    }

    pub fn channel(&self) -> Option<&str> {
        self.origin.as_ref().map(|(_, channel)| channel.as_ref())
    }

    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(id: EventId, channel: &str, event_type: &str, payload: serde_json::Value) -> Event {
        Event {
            id,
            channel: channel.to_string(),
            event_type: event_type.to_string(),
            payload,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_frame_wire_format() {
        let frame = Frame::event(&event(1, "news", "update", json!({"x": 1})));
        assert_eq!(&frame.bytes()[..], b"id: 1\nevent: update\ndata: {\"x\":1}\n\n");
        assert_eq!(frame.event_id(), Some(1));
        assert_eq!(frame.channel(), Some("news"));
    }

    #[test]
    fn test_heartbeat_frame_has_no_fields() {
        let frame = Frame::heartbeat();
        assert_eq!(&frame.bytes()[..], HEARTBEAT_FRAME.as_bytes());
        assert_eq!(frame.event_id(), None);
        assert_eq!(frame.channel(), None);
    }

    #[test]
    fn test_payload_with_newline_stays_on_one_data_line() {
        let frame = Frame::event(&event(2, "news", "note", json!("line\nbreak")));
        assert_eq!(
            &frame.bytes()[..],
            b"id: 2\nevent: note\ndata: \"line\\nbreak\"\n\n"
        );
    }

    #[test]
    fn test_retry_frame() {
        let frame = Frame::retry(3000);
        assert_eq!(&frame.bytes()[..], b"retry: 3000\n\n");
        assert_eq!(frame.event_id(), None);
    }

    #[test]
    fn test_multiline_data_gets_one_prefix_per_line() {
        let fields = SseFields {
            event: Some("note"),
            data: "first\nsecond",
            ..SseFields::default()
        };
        assert_eq!(
            &fields.encode()[..],
            b"event: note\ndata: first\ndata: second\n\n"
        );
    }
}
