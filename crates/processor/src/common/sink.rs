//! Terminal stages

use crate::core::{Context, Event};
use crate::pipeline::Sink;
use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::{mpsc, Mutex};

/// Discards every event
#[derive(Debug, Clone)]
pub struct NullSink {
    name: String,
}

impl NullSink {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Sink for NullSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _ctx: &mut Context, _event: Event) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes each event as one line to stdout
#[derive(Debug)]
pub struct PrintSink {
    name: String,
    stdout: Mutex<Stdout>,
}

impl PrintSink {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }
}

#[async_trait]
impl Sink for PrintSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _ctx: &mut Context, event: Event) -> anyhow::Result<()> {
        let line = format!("{}\n", event);
        self.stdout.lock().await.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        self.stdout.lock().await.flush().await?;
        Ok(())
    }
}

/// Forwards events to an mpsc receiver
///
/// Awaits channel capacity, so a slow consumer slows the pipeline down.
#[derive(Debug)]
pub struct ChannelSink {
    name: String,
    tx: mpsc::Sender<(Context, Event)>,
}

impl ChannelSink {
    pub fn new<S: Into<String>>(name: S, capacity: usize) -> (Self, mpsc::Receiver<(Context, Event)>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, ctx: &mut Context, event: Event) -> anyhow::Result<()> {
        self.tx
            .send((ctx.clone(), event))
            .await
            .map_err(|_| anyhow::anyhow!("receiver of sink '{}' dropped", self.name))
    }
}
