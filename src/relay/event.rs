//! Event encoding
//!
//! Maps events onto the line-oriented Server-Sent Events wire format:
//!
//! ```text
//! event:<name>\n        (optional)
//! data:<line>\n         (one per payload line)
//! id:<id>\n             (optional)
//! retry:<ms>\n          (optional)
//! \n
//! ```

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use super::error::{RelayError, RelayResult};

/// Comment sent before the loop starts to commit headers and flush buffers
pub const PREAMBLE: &str = ":empty\n\n";

/// Comment sent on idle connections
pub const HEARTBEAT: &str = ":heartbeat\n\n";

/// A single client-visible event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    name: Option<String>,
    data: String,
    id: Option<String>,
    retry: Option<u64>,
}

impl Event {
    /// Create an event whose data is the compact JSON form of `payload`
    pub fn new(payload: Value) -> Self {
        Self::text(payload.to_string())
    }

    /// Create an event from any serializable payload
    pub fn json<T: Serialize>(payload: &T) -> RelayResult<Self> {
        let data = serde_json::to_string(payload)
            .map_err(|e| RelayError::InvalidEvent(format!("payload is not serializable: {}", e)))?;
        Ok(Self::text(data))
    }

    /// Create an event carrying raw text data (may span several lines)
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    /// Set the event name (`event:` field)
    pub fn name(mut self, name: impl AsRef<str>) -> Self {
        self.name = Some(single_line(name.as_ref()));
        self
    }

    /// Set the event id (`id:` field)
    pub fn id(mut self, id: impl AsRef<str>) -> Self {
        self.id = Some(single_line(id.as_ref()));
        self
    }

    /// Set the reconnection hint in milliseconds (`retry:` field)
    pub fn retry(mut self, millis: u64) -> Self {
        self.retry = Some(millis);
        self
    }

    pub fn event_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn event_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Encode the event into its wire text, terminator included
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 16);

        if let Some(name) = &self.name {
            out.push_str("event:");
            out.push_str(name);
            out.push('\n');
        }

        for line in data_lines(&self.data) {
            out.push_str("data:");
            out.push_str(line);
            out.push('\n');
        }

        if let Some(id) = &self.id {
            out.push_str("id:");
            out.push_str(id);
            out.push('\n');
        }

        if let Some(retry) = self.retry {
            out.push_str("retry:");
            out.push_str(&retry.to_string());
            out.push('\n');
        }

        out.push('\n');
        out
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Stand-alone reconnection hint block sent after the preamble
pub fn encode_retry(millis: u64) -> String {
    format!("retry:{}\n\n", millis)
}

/// Value accepted by `send_event`: a raw payload or a pre-built event
#[derive(Debug, Clone)]
pub enum EventInput {
    Payload(Value),
    Event(Event),
}

impl EventInput {
    /// Resolve into an event. Raw payloads must be JSON objects or arrays.
    pub fn into_event(self) -> RelayResult<Event> {
        match self {
            EventInput::Event(event) => Ok(event),
            EventInput::Payload(payload @ (Value::Object(_) | Value::Array(_))) => {
                Ok(Event::new(payload))
            }
            EventInput::Payload(other) => Err(RelayError::InvalidEvent(format!(
                "expected an object or array payload, got {}",
                value_kind(&other)
            ))),
        }
    }
}

impl From<Value> for EventInput {
    fn from(payload: Value) -> Self {
        EventInput::Payload(payload)
    }
}

impl From<Event> for EventInput {
    fn from(event: Event) -> Self {
        EventInput::Event(event)
    }
}

/// Split data into protocol lines on CRLF, CR or LF
fn data_lines(data: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(data);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.find(|c: char| c == '\r' || c == '\n') {
            Some(pos) => {
                let skip = if current[pos..].starts_with("\r\n") { 2 } else { 1 };
                rest = Some(&current[pos + skip..]);
                Some(&current[..pos])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

fn single_line(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
