//! `echo`: line-oriented TCP echo server

use anyhow::Context as _;
use async_trait::async_trait;
use clap::Args;
use eventpump::connector::{TcpSourceConfig, TcpStreamSource};
use eventpump::{Application, Context, Event, ExitStatus, PipelineBuilder, PumpService, Sink};
use std::sync::Arc;
use tracing::debug;

pub const PIPELINE_ID: &str = "echo";

#[derive(Args, Debug, Clone)]
pub struct EchoCommand {
    /// Listen address, `host:port`
    #[arg(long, short = 'a', default_value = "0.0.0.0:8083")]
    pub address: String,
}

impl EchoCommand {
    pub async fn execute(&self, app: Arc<Application>) -> anyhow::Result<ExitStatus> {
        let service = PumpService::install(&app)?;

        let source = TcpStreamSource::bind(
            "listener",
            &TcpSourceConfig {
                address: self.address.clone(),
            },
        )
        .await
        .with_context(|| format!("cannot listen on {}", self.address))?;

        // A bad request must not take the server down
        let pipeline = PipelineBuilder::new(PIPELINE_ID)
            .source(source)
            .sink(EchoSink)
            .stop_on_errors(false)
            .build(&app)?;
        service.add_pipeline(pipeline)?;

        app.initialize().await?;
        Ok(app.run().await?)
    }
}

/// Writes every line back to the connection it came from
struct EchoSink;

#[async_trait]
impl Sink for EchoSink {
    fn name(&self) -> &str {
        "echo"
    }

    async fn process(&self, ctx: &mut Context, event: Event) -> anyhow::Result<()> {
        let reply = ctx
            .reply
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("event from '{}' cannot be answered", ctx.source))?;

        let mut line = event
            .as_bytes()
            .ok_or_else(|| anyhow::anyhow!("structured events cannot be echoed"))?
            .to_vec();
        debug!(peer = ?ctx.attribute("peer"), bytes = line.len(), "Echo");
        line.push(b'\n');

        reply.send(line).await.context("connection closed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_echo_sink_replies_with_newline() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut ctx = Context::new("listener").with_reply(tx);

        EchoSink.process(&mut ctx, Event::from("hello")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"hello\n".to_vec());
    }

    #[tokio::test]
    async fn test_echo_sink_without_reply_fails() {
        let mut ctx = Context::new("listener");
        assert!(EchoSink.process(&mut ctx, Event::from("hello")).await.is_err());
    }
}
