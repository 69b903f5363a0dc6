//! Pipeline execution engine
//!
//! This module threads events from the source through the processor chain
//! into the terminal stage, enforcing readiness and the error policy.

use crate::application::Application;
use crate::bus::{topics, PubSub};
use crate::core::{Context, Event};
use crate::error::{PumpError, Result};
use crate::metrics::{PipelineMeter, PipelineMetricsSnapshot};
use crate::pipeline::control::PipelineControl;
use crate::pipeline::operator::{Outcome, Processor, Sink, Source};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One element of the chain after the source
#[derive(Clone)]
pub enum Stage {
    Processor(Arc<dyn Processor>),
    Sink(Arc<dyn Sink>),
}

impl Stage {
    pub fn name(&self) -> &str {
        match self {
            Stage::Processor(processor) => processor.name(),
            Stage::Sink(sink) => sink.name(),
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Processor(p) => write!(f, "Processor({})", p.name()),
            Stage::Sink(s) => write!(f, "Sink({})", s.name()),
        }
    }
}

/// A linear source -> processors -> sink chain
///
/// Build one with [`PipelineBuilder`](crate::pipeline::PipelineBuilder).
/// Events are injected by the source through [`process`](Pipeline::process);
/// the pipeline accepts them only while ready.
pub struct Pipeline {
    id: String,
    source_name: String,
    source: Mutex<Option<Box<dyn Source>>>,
    stages: Vec<Stage>,
    stop_on_errors: bool,
    control: PipelineControl,
    meter: PipelineMeter,
    bus: Arc<PubSub>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("source", &self.source_name)
            .field("stages", &self.stages)
            .field("stop_on_errors", &self.stop_on_errors)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl Pipeline {
    pub(crate) fn new(
        id: String,
        source: Box<dyn Source>,
        stages: Vec<Stage>,
        stop_on_errors: bool,
        app: &Application,
    ) -> Self {
        Self {
            source_name: source.name().to_string(),
            source: Mutex::new(Some(source)),
            stages,
            stop_on_errors,
            control: PipelineControl::new(&id, app.stop_signal()),
            meter: app.metrics().pipeline().meter(id.as_str()),
            bus: Arc::clone(app.bus()),
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stop_on_errors(&self) -> bool {
        self.stop_on_errors
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Readiness, throttling and error state
    pub fn control(&self) -> &PipelineControl {
        &self.control
    }

    pub fn is_ready(&self) -> bool {
        self.control.is_ready()
    }

    /// Wait until the pipeline accepts events
    pub async fn ready(&self) {
        self.control.ready().await
    }

    /// Counter values of this pipeline
    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.meter.snapshot()
    }

    /// Bootstrap the stages and spawn the source
    ///
    /// Runs every stage's `start` hook in chain order, marks the pipeline
    /// ready and then spawns the source's `main` loop. A pipeline can only be
    /// started once.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut source = self.source.lock().take().ok_or(PumpError::InvalidState {
            expected: "built",
            actual: "started".to_string(),
        })?;

        for stage in &self.stages {
            let started = match stage {
                Stage::Processor(processor) => processor.start(&self.control).await,
                Stage::Sink(sink) => sink.start(&self.control).await,
            };
            started.map_err(|source| self.stage_error(stage.name(), source))?;
        }

        self.control.set_bootstrapped();
        info!(pipeline = %self.id, "Pipeline started");

        let pipeline = Arc::clone(self);
        let shutdown = self.control.shutdown();
        Ok(tokio::spawn(async move {
            let result = source.main(Arc::clone(&pipeline), shutdown).await;
            match result {
                Ok(()) => debug!(pipeline = %pipeline.id, source = %source.name(), "Source finished"),
                Err(e) => {
                    let err = pipeline.stage_error(source.name(), e);
                    error!(pipeline = %pipeline.id, error = %err, "Source failed");
                    pipeline.meter.error();
                    pipeline.set_error(&err, None);
                }
            }
        }))
    }

    /// Inject one event
    ///
    /// Fails with [`PumpError::NotReady`] without touching any stage when the
    /// pipeline is not ready. A stage failure is returned as
    /// [`PumpError::Stage`]; with `stop_on_errors` it also moves the pipeline
    /// into the error state.
    pub async fn process(&self, mut ctx: Context, event: Event) -> Result<()> {
        if !self.control.is_ready() {
            return Err(PumpError::NotReady {
                pipeline: self.id.clone(),
            });
        }

        self.meter.event_in();
        match self.run_chain(0, &mut ctx, event).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.meter.error();
                if self.stop_on_errors {
                    self.set_error(&err, Some(&ctx));
                } else {
                    warn!(pipeline = %self.id, error = %err, "Event failed, pipeline continues");
                    self.announce_error(&err, Some(&ctx));
                }
                Err(err)
            }
        }
    }

    fn run_chain<'a>(
        &'a self,
        index: usize,
        ctx: &'a mut Context,
        event: Event,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let Some(stage) = self.stages.get(index) else {
                // Past a terminal processor
                self.meter.event_out();
                return Ok(());
            };

            match stage {
                Stage::Sink(sink) => {
                    sink.process(ctx, event)
                        .await
                        .map_err(|source| self.stage_error(sink.name(), source))?;
                    self.meter.event_out();
                    Ok(())
                }
                Stage::Processor(processor) => {
                    let outcome = processor
                        .process(ctx, event)
                        .await
                        .map_err(|source| self.stage_error(processor.name(), source))?;

                    match outcome {
                        Outcome::Forward(event) => self.run_chain(index + 1, ctx, event).await,
                        Outcome::Fanout(events) => {
                            for event in events {
                                self.run_chain(index + 1, ctx, event).await?;
                            }
                            Ok(())
                        }
                        Outcome::Drop => {
                            self.meter.event_dropped();
                            Ok(())
                        }
                    }
                }
            }
        }
        .boxed()
    }

    /// Move the pipeline into the error state
    ///
    /// `ctx` identifies the failing input, when there is one; its source and
    /// attributes are included in the `pipeline.error` announcement.
    pub fn set_error<E: fmt::Display>(&self, error: &E, ctx: Option<&Context>) {
        let message = error.to_string();
        match ctx {
            Some(ctx) => error!(
                pipeline = %self.id,
                error = %message,
                source = %ctx.source,
                attributes = ?ctx.attributes,
                "Pipeline error"
            ),
            None => error!(pipeline = %self.id, error = %message, "Pipeline error"),
        }
        self.control.set_error(message);
        self.announce_error(error, ctx);
    }

    /// Leave the error state; returns false if there was no error
    pub fn clear_error(&self) -> bool {
        self.control.clear_error()
    }

    /// Ask every stage to drain buffered state
    ///
    /// All stages are flushed even if one fails; the first failure is returned.
    pub async fn flush(&self) -> Result<()> {
        let mut first_error = None;

        for stage in &self.stages {
            let flushed = match stage {
                Stage::Processor(processor) => processor.flush().await,
                Stage::Sink(sink) => sink.flush().await,
            };

            if let Err(source) = flushed {
                let err = self.stage_error(stage.name(), source);
                warn!(pipeline = %self.id, error = %err, "Flush failed");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn stage_error(&self, stage: &str, source: anyhow::Error) -> PumpError {
        PumpError::Stage {
            pipeline: self.id.clone(),
            stage: stage.to_string(),
            source,
        }
    }

    fn announce_error<E: fmt::Display>(&self, error: &E, ctx: Option<&Context>) {
        let bus = Arc::clone(&self.bus);
        let mut payload = json!({ "pipeline": self.id, "error": error.to_string() });
        if let Some(ctx) = ctx {
            payload["source"] = Value::String(ctx.source.clone());
            payload["attributes"] = Value::Object(ctx.attributes.clone());
        }

        // `set_error` is synchronous and may run inside a failing stage, so the
        // publish is spawned rather than awaited. Subscribers are still awaited
        // in order within that publish; supervisors that must not hold it up
        // register with `subscribe_detached`.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = bus.publish(topics::PIPELINE_ERROR, payload).await;
            });
        }
    }
}
