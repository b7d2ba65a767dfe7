//! Incremental server-sent-events parser.
//!
//! An explicit state machine over the raw byte stream:
//!
//! ```text
//!   AwaitingEvent --event:--> HaveType --data:--> HaveData --blank--> emit, AwaitingEvent
//!   AwaitingEvent --data:-----------------------> HaveData
//!   HaveType      --blank--> discard (no data), AwaitingEvent
//! ```
//!
//! Chunks may split anywhere, including inside a line or a UTF-8 sequence;
//! bytes are buffered until a full line (`\n` or `\r\n`) is available.

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event_type: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// Value of the last `id:` field, if any.
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    AwaitingEvent,
    HaveType,
    HaveData,
}

#[derive(Debug)]
pub struct SseParser {
    state: ParserState,
    /// Bytes of the current, not yet terminated line.
    line: Vec<u8>,
    event_type: Option<String>,
    data: String,
    id: Option<String>,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingEvent,
            line: Vec::new(),
            event_type: None,
            data: String::new(),
            id: None,
        }
    }

    /// Feed a chunk, returning every event completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if let Some(event) = self.process_line(&String::from_utf8_lossy(&line)) {
                    events.push(event);
                }
            } else {
                self.line.push(byte);
            }
        }
        events
    }

    /// Whether an unterminated line or undispatched event is buffered.
    ///
    /// Such input is discarded at end of stream, per the SSE rules.
    pub fn has_partial(&self) -> bool {
        !self.line.is_empty() || self.state != ParserState::AwaitingEvent
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
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
            "event" => {
                self.event_type = Some(value.to_string());
                if self.state == ParserState::AwaitingEvent {
                    self.state = ParserState::HaveType;
                }
            }
            "data" => {
                if self.state == ParserState::HaveData {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.state = ParserState::HaveData;
            }
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let state = std::mem::replace(&mut self.state, ParserState::AwaitingEvent);
        let event_type = self.event_type.take();
        let data = std::mem::take(&mut self.data);
        match state {
            ParserState::HaveData => Some(SseEvent {
                event_type,
                data,
                id: self.id.clone(),
            }),
            ParserState::HaveType | ParserState::AwaitingEvent => None,
        }
    }
}
