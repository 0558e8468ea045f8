//! Incremental decoder for `text/event-stream` bodies
//!
//! Bytes arrive in arbitrary chunks, so partial lines are buffered until a
//! line terminator shows up. An event is dispatched on a blank line.

use super::StreamError;

/// One dispatched server-sent event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: Option<String>,
    pub id: Option<String>,
}

/// Upper bound on a single line or a single event's data
pub const MAX_EVENT_BYTES: usize = 1 << 20;

const BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Set once the start of the body has been checked for a byte order mark
    bom_checked: bool,
    /// Last chunk ended on `\r`, so a leading `\n` in the next one belongs to it
    pending_cr: bool,
    limit: usize,
    event: Option<String>,
    data: Option<String>,
    id: Option<String>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            bom_checked: false,
            pending_cr: false,
            limit,
            event: None,
            data: None,
            id: None,
        }
    }

    /// Feed a chunk and return every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, StreamError> {
        let head;
        let mut bytes = chunk;

        if !self.bom_checked {
            // Hold back the first bytes until they can be told apart from a BOM
            self.buffer.extend_from_slice(bytes);
            if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer) {
                return Ok(Vec::new());
            }
            self.bom_checked = true;
            head = std::mem::take(&mut self.buffer);
            bytes = head.strip_prefix(BOM).unwrap_or(&head);
        }

        let mut events = Vec::new();

        if self.pending_cr {
            self.pending_cr = false;
            if let Some(rest) = bytes.strip_prefix(b"\n") {
                bytes = rest;
            }
        }

        let mut start = 0;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\n' | b'\r' => {
                    self.buffer.extend_from_slice(&bytes[start..i]);
                    let line = std::mem::take(&mut self.buffer);
                    if let Some(event) = self.process_line(&String::from_utf8_lossy(&line))? {
                        events.push(event);
                    }

                    if bytes[i] == b'\r' {
                        if i + 1 == bytes.len() {
                            self.pending_cr = true;
                        } else if bytes[i + 1] == b'\n' {
                            i += 1;
                        }
                    }
                    start = i + 1;
                }
                _ => {}
            }
            i += 1;
        }
        self.buffer.extend_from_slice(&bytes[start..]);

        if self.buffer.len() > self.limit {
            return Err(StreamError::EventTooLarge { limit: self.limit });
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &str) -> Result<Option<SseEvent>, StreamError> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }
        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // retry and unknown fields do not matter to a one-shot stream
            _ => {}
        }

        if self.data.as_ref().map_or(0, String::len) > self.limit {
            return Err(StreamError::EventTooLarge { limit: self.limit });
        }
        Ok(None)
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_none() && self.event.is_none() && self.id.is_none() {
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: self.data.take(),
            id: self.id.take(),
        })
    }
}
