//! Stock processors and sinks

pub mod json;
pub mod sink;

pub use json::{JsonBytesToRecord, RecordToJsonBytes};
pub use sink::{ChannelSink, NullSink, PrintSink};
