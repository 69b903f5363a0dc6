//! Core event structures and traits
//!
//! This module provides the unit of work flowing through pipelines:
//! - Event: the payload, either raw bytes, text or a structured record
//! - Context: per-event metadata owned by the invocation processing it
//! - EventTimeExtractor: trait for deriving an event timestamp in unix seconds

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::mpsc;

/// Payload flowing through a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// Raw bytes, e.g. a line read from a file or socket
    Bytes(Vec<u8>),
    /// Decoded text
    Text(String),
    /// Structured record
    Record(Value),
}

impl Event {
    /// Create a record event from any JSON value
    pub fn record(value: Value) -> Self {
        Event::Record(value)
    }

    /// Borrow the structured record, if this is one
    pub fn as_record(&self) -> Option<&Value> {
        match self {
            Event::Record(value) => Some(value),
            _ => None,
        }
    }

    /// Borrow the payload as bytes (records are not serialized here)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Event::Bytes(bytes) => Some(bytes),
            Event::Text(text) => Some(text.as_bytes()),
            Event::Record(_) => None,
        }
    }

    /// Size of the payload in bytes, used for metering
    pub fn len(&self) -> usize {
        match self {
            Event::Bytes(bytes) => bytes.len(),
            Event::Text(text) => text.len(),
            Event::Record(value) => value.to_string().len(),
        }
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Bytes(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Event::Text(text) => write!(f, "{}", text),
            Event::Record(value) => write!(f, "{}", value),
        }
    }
}

impl From<Vec<u8>> for Event {
    fn from(bytes: Vec<u8>) -> Self {
        Event::Bytes(bytes)
    }
}

impl From<String> for Event {
    fn from(text: String) -> Self {
        Event::Text(text)
    }
}

impl From<&str> for Event {
    fn from(text: &str) -> Self {
        Event::Text(text.to_string())
    }
}

impl From<Value> for Event {
    fn from(value: Value) -> Self {
        Event::Record(value)
    }
}

/// Handle a sink can use to answer the peer that produced the event
pub type ReplyHandle = mpsc::Sender<Vec<u8>>;

/// Per-event metadata
///
/// A context is created by the source for every inbound item and handed
/// mutably to each stage in turn, so stages may annotate it.
#[derive(Debug, Clone)]
pub struct Context {
    /// Identifier of the source that produced the event
    pub source: String,
    /// When the source received the event
    pub received_at: DateTime<Utc>,
    /// Free-form attributes (file name, peer address, ...)
    pub attributes: Map<String, Value>,
    /// Reply channel for request/response sources
    pub reply: Option<ReplyHandle>,
}

impl Context {
    /// Create a new context for the given source
    pub fn new<S: Into<String>>(source: S) -> Self {
        Self {
            source: source.into(),
            received_at: Utc::now(),
            attributes: Map::new(),
            reply: None,
        }
    }

    /// Attach an attribute
    pub fn with_attribute<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Attach a reply channel
    pub fn with_reply(mut self, reply: ReplyHandle) -> Self {
        self.reply = Some(reply);
        self
    }

    /// Override the receive timestamp
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Look up an attribute
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Trait for extracting the event time, as unix seconds
pub trait EventTimeExtractor: Send + Sync {
    /// Return `None` when the event carries no usable timestamp
    fn extract_event_time(&self, ctx: &Context, event: &Event) -> Option<f64>;
}

/// Reads a numeric (seconds) or RFC 3339 field of a record event
#[derive(Debug, Clone)]
pub struct JsonFieldTime {
    field: String,
}

impl JsonFieldTime {
    pub fn new<S: Into<String>>(field: S) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl EventTimeExtractor for JsonFieldTime {
    fn extract_event_time(&self, _ctx: &Context, event: &Event) -> Option<f64> {
        match event.as_record()?.get(&self.field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis() as f64 / 1000.0),
            _ => None,
        }
    }
}

/// Uses the moment the source received the event
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceivedTime;

impl EventTimeExtractor for ReceivedTime {
    fn extract_event_time(&self, ctx: &Context, _event: &Event) -> Option<f64> {
        Some(ctx.received_at.timestamp_millis() as f64 / 1000.0)
    }
}

/// Current wall-clock time as unix seconds
pub fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
