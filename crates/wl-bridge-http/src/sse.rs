//! Incremental parser for `text/event-stream` bodies.

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Events without an explicit type are plain messages.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Feeds raw body chunks in, gets complete events out.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    id: Option<String>,
    last_event_id: Option<String>,
}

impl SseParser {
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Drops any half-received event, keeping the last seen event id.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.data.clear();
        self.event = None;
        self.id = None;
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut dispatched = Vec::new();

        while let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..end]);
            let line = line.strip_suffix('\r').unwrap_or(&line);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    dispatched.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "data" => self.data.push(value.to_owned()),
                "event" => self.event = Some(value.to_owned()),
                "id" => self.id = Some(value.to_owned()),
                _ => {}
            }
        }

        dispatched
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let id = self.id.take();
        if id.is_some() {
            self.last_event_id = id.clone();
        }
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(SseEvent { id, event, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_events_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"id: 17\r\nevent: mess").is_empty());
        let events = parser.push(b"age\r\ndata: {\"from\":\"ab\"}\r\n\r\n");

        assert_eq!(
            events,
            vec![SseEvent {
                id: Some("17".to_owned()),
                event: Some("message".to_owned()),
                data: "{\"from\":\"ab\"}".to_owned(),
            }]
        );
        assert_eq!(parser.last_event_id(), Some("17"));
    }

    #[test]
    fn heartbeats_and_comments_are_not_messages() {
        let mut parser = SseParser::default();
        let events = parser.push(b": keep-alive\n\nevent: heartbeat\ndata: heartbeat\n\n");

        assert_eq!(events.len(), 1);
        assert!(!events[0].is_message());
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut parser = SseParser::default();
        let events = parser.push(b"data: first\ndata:second\n\n");
        assert_eq!(events[0].data, "first\nsecond");
        assert!(events[0].is_message());
    }

    #[test]
    fn reset_discards_partial_event_but_keeps_id() {
        let mut parser = SseParser::default();
        parser.push(b"id: 3\ndata: done\n\n");
        parser.push(b"data: half");
        parser.reset();

        assert!(parser.push(b"\n\n").is_empty());
        assert_eq!(parser.last_event_id(), Some("3"));
    }
}
