//! Metrics registry owned by the application

use super::pipeline::PipelineMetrics;
use parking_lot::RwLock;
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Thread-safe registry for Prometheus metrics
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<RwLock<Registry>>,
    pipeline: PipelineMetrics,
}

impl MetricsRegistry {
    /// Create a new registry with the pipeline counter families registered
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("eventpump");
        let pipeline = PipelineMetrics::default();
        pipeline.register(&mut registry);

        Self {
            registry: Arc::new(RwLock::new(registry)),
            pipeline,
        }
    }

    /// Get a reference to the internal registry, for custom metrics
    pub fn registry(&self) -> Arc<RwLock<Registry>> {
        self.registry.clone()
    }

    /// Pipeline counter families
    pub fn pipeline(&self) -> &PipelineMetrics {
        &self.pipeline
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, super::MetricsError> {
        let registry = self.registry.read();
        let mut buffer = String::new();

        prometheus_client::encoding::text::encode(&mut buffer, &registry)
            .map_err(|e| super::MetricsError::EncodingError(e.to_string()))?;

        Ok(buffer)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}
