//! Label sets for Prometheus metrics

use prometheus_client::encoding::EncodeLabelSet;

/// Labels attached to every pipeline counter
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PipelineLabels {
    pub pipeline: String,
}

impl PipelineLabels {
    pub fn new<S: Into<String>>(pipeline: S) -> Self {
        Self {
            pipeline: pipeline.into(),
        }
    }
}
