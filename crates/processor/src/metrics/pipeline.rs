//! Per-pipeline event counters

use super::labels::PipelineLabels;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

/// Counter families shared by all pipelines of one application
#[derive(Clone, Debug, Default)]
pub struct PipelineMetrics {
    events_in: Family<PipelineLabels, Counter>,
    events_out: Family<PipelineLabels, Counter>,
    events_dropped: Family<PipelineLabels, Counter>,
    errors: Family<PipelineLabels, Counter>,
}

impl PipelineMetrics {
    pub(crate) fn register(&self, registry: &mut Registry) {
        registry.register(
            "pipeline_events_in",
            "Events admitted into a pipeline",
            self.events_in.clone(),
        );
        registry.register(
            "pipeline_events_out",
            "Events that reached the end of a pipeline",
            self.events_out.clone(),
        );
        registry.register(
            "pipeline_events_dropped",
            "Events dropped by a processor",
            self.events_dropped.clone(),
        );
        registry.register(
            "pipeline_errors",
            "Stage failures while processing an event",
            self.errors.clone(),
        );
    }

    /// Create a meter bound to one pipeline
    pub fn meter<S: Into<String>>(&self, pipeline: S) -> PipelineMeter {
        PipelineMeter {
            labels: PipelineLabels::new(pipeline),
            metrics: self.clone(),
        }
    }

    /// Current counter values of one pipeline
    pub fn snapshot(&self, pipeline: &str) -> PipelineMetricsSnapshot {
        let labels = PipelineLabels::new(pipeline);
        PipelineMetricsSnapshot {
            events_in: self.events_in.get_or_create(&labels).get(),
            events_out: self.events_out.get_or_create(&labels).get(),
            events_dropped: self.events_dropped.get_or_create(&labels).get(),
            errors: self.errors.get_or_create(&labels).get(),
        }
    }
}

/// Counter values of one pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineMetricsSnapshot {
    pub events_in: u64,
    pub events_out: u64,
    pub events_dropped: u64,
    pub errors: u64,
}

/// Counters of a single pipeline
#[derive(Clone, Debug)]
pub struct PipelineMeter {
    labels: PipelineLabels,
    metrics: PipelineMetrics,
}

impl PipelineMeter {
    pub fn event_in(&self) {
        self.metrics.events_in.get_or_create(&self.labels).inc();
    }

    pub fn event_out(&self) {
        self.metrics.events_out.get_or_create(&self.labels).inc();
    }

    pub fn event_dropped(&self) {
        self.metrics.events_dropped.get_or_create(&self.labels).inc();
    }

    pub fn error(&self) {
        self.metrics.errors.get_or_create(&self.labels).inc();
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        self.metrics.snapshot(&self.labels.pipeline)
    }
}
