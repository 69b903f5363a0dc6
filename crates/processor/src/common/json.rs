//! JSON encoding stages

use crate::core::{Context, Event};
use crate::pipeline::{Outcome, Processor};
use anyhow::Context as _;
use async_trait::async_trait;

/// Parses byte or text events holding a JSON document into records
///
/// Records pass through unchanged.
#[derive(Debug, Clone)]
pub struct JsonBytesToRecord {
    name: String,
}

impl JsonBytesToRecord {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Processor for JsonBytesToRecord {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _ctx: &mut Context, event: Event) -> anyhow::Result<Outcome> {
        let value = match event {
            Event::Record(value) => value,
            Event::Bytes(bytes) => serde_json::from_slice(&bytes).context("invalid JSON bytes")?,
            Event::Text(text) => serde_json::from_str(&text).context("invalid JSON text")?,
        };
        Ok(Outcome::Forward(Event::Record(value)))
    }
}

/// Serializes records into JSON bytes
#[derive(Debug, Clone)]
pub struct RecordToJsonBytes {
    name: String,
}

impl RecordToJsonBytes {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Processor for RecordToJsonBytes {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _ctx: &mut Context, event: Event) -> anyhow::Result<Outcome> {
        let bytes = match event {
            Event::Record(value) => serde_json::to_vec(&value)?,
            Event::Text(text) => text.into_bytes(),
            Event::Bytes(bytes) => bytes,
        };
        Ok(Outcome::Forward(Event::Bytes(bytes)))
    }
}
