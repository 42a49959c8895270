//! Server-Sent Events framing and replay buffering.
//!
//! The write side produces `id:`/`event:`/`data:` framed events with
//! strictly increasing decimal ids per stream; the read side is an
//! incremental parser that tolerates comments and partial chunks.
//! Payloads are pre-serialized compact JSON, so `data:` is always a single
//! line.

use std::collections::VecDeque;

use crate::error::{TransportError, TransportResult};

/// A framed Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event id for resumption; decimal, strictly increasing per stream
    pub id: Option<u64>,
    /// Event type (clients treat a missing type as "message")
    pub event: Option<String>,
    /// Event payload
    pub data: String,
    /// Retry interval hint in milliseconds
    pub retry: Option<u64>,
}

impl SseEvent {
    /// A plain message event.
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
            retry: None,
        }
    }

    /// A message event with an id.
    pub fn with_id(id: u64, data: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            event: None,
            data: data.into(),
            retry: None,
        }
    }

    /// Set the event type.
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }
}

/// SSE encoder producing wire frames.
pub struct SseEncoder;

impl SseEncoder {
    /// Encode an event.
    ///
    /// The payload must be single-line (pre-serialized compact JSON).
    pub fn encode(event: &SseEvent) -> String {
        debug_assert!(
            !event.data.contains('\n'),
            "SSE payloads must be single-line compact JSON"
        );

        let mut output = String::with_capacity(event.data.len() + 32);
        if let Some(id) = event.id {
            output.push_str("id: ");
            output.push_str(&id.to_string());
            output.push('\n');
        }
        if let Some(ref event_type) = event.event {
            output.push_str("event: ");
            output.push_str(event_type);
            output.push('\n');
        }
        if let Some(retry) = event.retry {
            output.push_str("retry: ");
            output.push_str(&retry.to_string());
            output.push('\n');
        }
        output.push_str("data: ");
        output.push_str(&event.data);
        output.push_str("\n\n");
        output
    }

    /// Encode a keepalive comment.
    pub fn encode_keepalive() -> &'static str {
        ": keepalive\n\n"
    }
}

/// Incremental SSE parser.
///
/// Feed raw chunks as they arrive; complete events are returned as soon as
/// their terminating blank line is seen. Parsing never blocks the write
/// side; the parser owns only its own buffer.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    current_id: Option<u64>,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_retry: Option<u64>,
}

impl SseParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes to the parser and collect any completed events.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let Ok(text) = std::str::from_utf8(chunk) else {
            return Vec::new();
        };
        self.buffer.push_str(text);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.flush_event() {
                    events.push(event);
                }
            } else if line.starts_with(':') {
                // Comment / keepalive
            } else if let Some(colon) = line.find(':') {
                let field = &line[..colon];
                let value = line[colon + 1..].trim_start();
                match field {
                    "id" => self.current_id = value.parse().ok(),
                    "event" => self.current_event = Some(value.to_string()),
                    "data" => self.current_data.push(value.to_string()),
                    "retry" => self.current_retry = value.parse().ok(),
                    _ => {}
                }
            }
        }
        events
    }

    fn flush_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.current_id = None;
            self.current_event = None;
            self.current_retry = None;
            return None;
        }
        let data = self.current_data.join("\n");
        self.current_data.clear();
        Some(SseEvent {
            id: self.current_id.take(),
            event: self.current_event.take(),
            data,
            retry: self.current_retry.take(),
        })
    }
}

/// Bounded replay buffer with monotonically increasing event ids.
///
/// Ids start at 1 and never repeat within a stream. When the high-water
/// mark is exceeded the oldest event is discarded; resumption from beyond
/// the discarded window is reported as an error so the caller can reset the
/// stream.
#[derive(Debug)]
pub struct EventBuffer {
    next_id: u64,
    capacity: usize,
    events: VecDeque<(u64, String)>,
}

impl EventBuffer {
    /// Create a buffer retaining up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            next_id: 1,
            capacity: capacity.max(1),
            events: VecDeque::new(),
        }
    }

    /// Append a payload, assigning the next event id.
    pub fn append(&mut self, data: String) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back((id, data));
        id
    }

    /// Highest id handed out so far (0 before the first event).
    pub fn last_id(&self) -> u64 {
        self.next_id - 1
    }

    /// Events after `last_seen`, in order.
    ///
    /// A `last_seen` at or beyond the highest emitted id means nothing to
    /// replay. If the events the client needs were already evicted the
    /// buffer reports the gap instead of replaying a partial window.
    pub fn replay_from(&self, last_seen: u64) -> TransportResult<Vec<(u64, String)>> {
        if last_seen >= self.last_id() {
            return Ok(Vec::new());
        }
        match self.events.front() {
            Some((oldest, _)) if *oldest > last_seen + 1 => {
                Err(TransportError::ReplayWindowExceeded {
                    requested: last_seen + 1,
                    oldest: *oldest,
                })
            }
            None => Err(TransportError::ReplayWindowExceeded {
                requested: last_seen + 1,
                oldest: self.next_id,
            }),
            Some(_) => Ok(self
                .events
                .iter()
                .filter(|(id, _)| *id > last_seen)
                .cloned()
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_with_id_and_type() {
        let event = SseEvent::with_id(3, r#"{"x":1}"#).with_event("message");
        assert_eq!(
            SseEncoder::encode(&event),
            "id: 3\nevent: message\ndata: {\"x\":1}\n\n"
        );
    }

    #[test]
    fn test_encode_minimal() {
        assert_eq!(SseEncoder::encode(&SseEvent::message("x")), "data: x\n\n");
    }

    #[test]
    fn test_parser_single_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"id: 1\nevent: message\ndata: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, Some(1));
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_parser_incremental_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"id: 2\nda").is_empty());
        assert!(parser.feed(b"ta: partial\n").is_empty());
        let events = parser.feed(b"\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, Some(2));
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn test_parser_skips_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keepalive\n\ndata: real\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "real");
    }

    #[test]
    fn test_parser_round_trip() {
        let original = SseEvent::with_id(7, r#"{"jsonrpc":"2.0"}"#).with_event("message");
        let mut parser = SseParser::new();
        let events = parser.feed(SseEncoder::encode(&original).as_bytes());
        assert_eq!(events, vec![original]);
    }

    #[test]
    fn test_buffer_ids_strictly_increasing_from_one() {
        let mut buffer = EventBuffer::new(10);
        assert_eq!(buffer.append("a".into()), 1);
        assert_eq!(buffer.append("b".into()), 2);
        assert_eq!(buffer.append("c".into()), 3);
        assert_eq!(buffer.last_id(), 3);
    }

    #[test]
    fn test_buffer_replay_in_order() {
        let mut buffer = EventBuffer::new(10);
        for payload in ["a", "b", "c", "d"] {
            buffer.append(payload.into());
        }
        let replayed = buffer.replay_from(2).unwrap();
        assert_eq!(replayed, vec![(3, "c".into()), (4, "d".into())]);
    }

    #[test]
    fn test_buffer_replay_beyond_highest_is_empty() {
        let mut buffer = EventBuffer::new(10);
        buffer.append("a".into());
        assert!(buffer.replay_from(1).unwrap().is_empty());
        assert!(buffer.replay_from(99).unwrap().is_empty());
    }

    #[test]
    fn test_buffer_eviction_detected() {
        let mut buffer = EventBuffer::new(2);
        for payload in ["a", "b", "c", "d"] {
            buffer.append(payload.into());
        }
        // Events 1 and 2 are gone; resuming from 1 needs event 2
        let err = buffer.replay_from(1).unwrap_err();
        assert!(matches!(
            err,
            TransportError::ReplayWindowExceeded {
                requested: 2,
                oldest: 3
            }
        ));
        // Resuming from 2 still works: events 3 and 4 are retained
        assert_eq!(buffer.replay_from(2).unwrap().len(), 2);
    }
}
