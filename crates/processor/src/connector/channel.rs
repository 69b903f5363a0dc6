//! In-process channel source

use crate::application::StopSignal;
use crate::connector::ready_or_shutdown;
use crate::core::{Context, Event};
use crate::error::PumpError;
use crate::pipeline::{Pipeline, Source};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Feeds the pipeline from an mpsc channel
///
/// Nothing is received while the pipeline is not ready, so senders block
/// once the channel is full. The source finishes when every sender is
/// dropped or the application stops.
pub struct ChannelSource {
    name: String,
    rx: mpsc::Receiver<(Context, Event)>,
}

impl ChannelSource {
    pub fn new<S: Into<String>>(name: S, capacity: usize) -> (Self, mpsc::Sender<(Context, Event)>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                name: name.into(),
                rx,
            },
            tx,
        )
    }
}

#[async_trait]
impl Source for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn main(&mut self, pipeline: Arc<Pipeline>, shutdown: StopSignal) -> anyhow::Result<()> {
        loop {
            if !ready_or_shutdown(&pipeline, &shutdown).await {
                break;
            }

            let item = tokio::select! {
                _ = shutdown.wait() => break,
                item = self.rx.recv() => item,
            };

            let Some((ctx, event)) = item else {
                debug!(source = %self.name, "All senders dropped");
                break;
            };

            match pipeline.process(ctx, event).await {
                Ok(()) => {}
                // Stage failures are already handled by the pipeline policy
                Err(PumpError::Stage { .. }) => {}
                Err(e) => warn!(source = %self.name, error = %e, "Event rejected"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::Application;
    use crate::common::ChannelSink;
    use crate::pipeline::PipelineBuilder;
    use eventpump_config::PumpConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn test_source_finishes_when_senders_drop() {
        let app = Application::builder(PumpConfig::default())
            .handle_signals(false)
            .build();
        let (source, tx) = ChannelSource::new("in", 4);
        let (sink, mut rx) = ChannelSink::new("out", 4);
        let pipeline = PipelineBuilder::new("p")
            .source(source)
            .sink(sink)
            .build(&app)
            .unwrap();

        let task = pipeline.start().await.unwrap();
        tx.send((Context::new("in"), Event::from("a"))).await.unwrap();
        drop(tx);

        let (_, event) = rx.recv().await.unwrap();
        assert_eq!(event, Event::from("a"));
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_source_stops_on_shutdown() {
        let app = Application::builder(PumpConfig::default())
            .handle_signals(false)
            .build();
        let (source, _tx) = ChannelSource::new("in", 4);
        let pipeline = PipelineBuilder::new("p")
            .source(source)
            .sink(crate::common::NullSink::new("null"))
            .build(&app)
            .unwrap();

        let task = pipeline.start().await.unwrap();
        app.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
