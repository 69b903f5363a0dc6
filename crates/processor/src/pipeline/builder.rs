//! Pipeline builder
//!
//! This module provides a builder for composing a source, a processor chain
//! and a terminal stage into a [`Pipeline`].

use crate::application::Application;
use crate::error::{PumpError, Result};
use crate::pipeline::executor::{Pipeline, Stage};
use crate::pipeline::operator::{Processor, Sink, Source};
use std::sync::Arc;
use tracing::debug;

/// Builder for constructing pipelines
///
/// The chain is validated on [`build`](PipelineBuilder::build): a source is
/// required, at least one stage must follow it, and a sink may only appear as
/// the last stage. Settings are read from the `pipeline.<id>` configuration
/// section unless overridden on the builder.
///
/// # Example
///
/// ```rust,no_run
/// use eventpump::application::Application;
/// use eventpump::common::{NullSink, JsonBytesToRecord};
/// use eventpump::connector::ChannelSource;
/// use eventpump::pipeline::PipelineBuilder;
/// use eventpump_config::PumpConfig;
///
/// # fn example() -> eventpump::error::Result<()> {
/// let app = Application::new(PumpConfig::default());
/// let (source, _sender) = ChannelSource::new("in", 64);
///
/// let pipeline = PipelineBuilder::new("ingest")
///     .source(source)
///     .processor(JsonBytesToRecord::new("parse"))
///     .sink(NullSink::new("out"))
///     .stop_on_errors(false)
///     .build(&app)?;
/// # Ok(())
/// # }
/// ```
pub struct PipelineBuilder {
    id: String,
    source: Option<Box<dyn Source>>,
    stages: Vec<Stage>,
    stop_on_errors: Option<bool>,
}

impl PipelineBuilder {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            source: None,
            stages: Vec::new(),
            stop_on_errors: None,
        }
    }

    /// Set the source, replacing any previous one
    pub fn source<S: Source + 'static>(mut self, source: S) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Append a processor
    pub fn processor<P: Processor + 'static>(mut self, processor: P) -> Self {
        self.stages.push(Stage::Processor(Arc::new(processor)));
        self
    }

    /// Append a processor the caller keeps a handle to
    pub fn shared_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.stages.push(Stage::Processor(processor));
        self
    }

    /// Append the terminal sink
    pub fn sink<K: Sink + 'static>(mut self, sink: K) -> Self {
        self.stages.push(Stage::Sink(Arc::new(sink)));
        self
    }

    /// Append a sink the caller keeps a handle to
    pub fn shared_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.stages.push(Stage::Sink(sink));
        self
    }

    /// Override `pipeline.<id>.stop_on_errors`
    pub fn stop_on_errors(mut self, enabled: bool) -> Self {
        self.stop_on_errors = Some(enabled);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(PumpError::Configuration(
                "pipeline id cannot be empty".to_string(),
            ));
        }

        if self.source.is_none() {
            return Err(PumpError::Configuration(format!(
                "pipeline '{}' has no source",
                self.id
            )));
        }

        if self.stages.is_empty() {
            return Err(PumpError::Configuration(format!(
                "pipeline '{}' needs at least one stage after the source",
                self.id
            )));
        }

        let last = self.stages.len() - 1;
        if let Some((_, stage)) = self
            .stages
            .iter()
            .enumerate()
            .find(|(index, stage)| matches!(stage, Stage::Sink(_)) && *index != last)
        {
            return Err(PumpError::Configuration(format!(
                "sink '{}' of pipeline '{}' must be the last stage",
                stage.name(),
                self.id
            )));
        }

        Ok(())
    }

    /// Validate the chain and build the pipeline for `app`
    pub fn build(self, app: &Application) -> Result<Arc<Pipeline>> {
        self.validate()?;

        let settings = app.config().pipeline(&self.id)?;
        let stop_on_errors = self.stop_on_errors.unwrap_or(settings.stop_on_errors);

        let source = self.source.ok_or_else(|| {
            PumpError::Configuration(format!("pipeline '{}' has no source", self.id))
        })?;

        debug!(
            pipeline = %self.id,
            source = %source.name(),
            stages = self.stages.len(),
            stop_on_errors,
            "Pipeline built"
        );

        Ok(Arc::new(Pipeline::new(
            self.id,
            source,
            self.stages,
            stop_on_errors,
            app,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{NullSink, RecordToJsonBytes};
    use crate::connector::ChannelSource;
    use eventpump_config::PumpConfig;

    fn app(yaml: &str) -> Arc<Application> {
        Application::builder(PumpConfig::from_yaml_str(yaml).unwrap())
            .handle_signals(false)
            .build()
    }

    #[test]
    fn test_missing_source_rejected() {
        let result = PipelineBuilder::new("p")
            .sink(NullSink::new("null"))
            .build(&app("{}"));
        assert!(matches!(result, Err(PumpError::Configuration(_))));
    }

    #[test]
    fn test_missing_stages_rejected() {
        let (source, _tx) = ChannelSource::new("in", 1);
        let result = PipelineBuilder::new("p").source(source).build(&app("{}"));
        assert!(matches!(result, Err(PumpError::Configuration(_))));
    }

    #[test]
    fn test_sink_must_be_last() {
        let (source, _tx) = ChannelSource::new("in", 1);
        let result = PipelineBuilder::new("p")
            .source(source)
            .sink(NullSink::new("null"))
            .processor(RecordToJsonBytes::new("encode"))
            .build(&app("{}"));

        match result {
            Err(PumpError::Configuration(msg)) => assert!(msg.contains("null")),
            other => panic!("unexpected result: {:?}", other.map(|p| p.id().to_string())),
        }
    }

    #[test]
    fn test_terminal_processor_allowed() {
        let (source, _tx) = ChannelSource::new("in", 1);
        let pipeline = PipelineBuilder::new("p")
            .source(source)
            .processor(RecordToJsonBytes::new("encode"))
            .build(&app("{}"))
            .unwrap();
        assert_eq!(pipeline.id(), "p");
    }

    #[test]
    fn test_stop_on_errors_from_config_and_override() {
        let app = app("pipeline:\n  p:\n    stop_on_errors: false\n");

        let (source, _tx) = ChannelSource::new("in", 1);
        let configured = PipelineBuilder::new("p")
            .source(source)
            .sink(NullSink::new("null"))
            .build(&app)
            .unwrap();
        assert!(!configured.stop_on_errors());

        let (source, _tx) = ChannelSource::new("in", 1);
        let overridden = PipelineBuilder::new("p")
            .source(source)
            .sink(NullSink::new("null"))
            .stop_on_errors(true)
            .build(&app)
            .unwrap();
        assert!(overridden.stop_on_errors());
    }
}
