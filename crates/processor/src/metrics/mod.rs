//! Prometheus metrics for the event pump
//!
//! Every [`Application`](crate::application::Application) owns one
//! [`MetricsRegistry`]; pipelines record into labelled counter families
//! registered there. Nothing is process-global, so independent applications
//! (e.g. in tests) never share counters.

mod labels;
mod pipeline;
mod registry;

pub use labels::PipelineLabels;
pub use pipeline::{PipelineMeter, PipelineMetrics, PipelineMetricsSnapshot};
pub use registry::MetricsRegistry;

use thiserror::Error;

/// Errors that can occur in the metrics subsystem
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metric encoding error: {0}")]
    EncodingError(String),
}
