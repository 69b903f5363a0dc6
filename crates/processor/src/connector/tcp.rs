//! Line-oriented TCP server source
//!
//! Every received line becomes one [`Event::Bytes`] whose context carries the
//! peer address and a reply handle writing back to the same connection.
//! Each connection has at most one event in flight.

use crate::application::StopSignal;
use crate::connector::ready_or_shutdown;
use crate::core::{Context, Event};
use crate::pipeline::{Pipeline, Source};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Pending replies per connection
const REPLY_BUFFER: usize = 64;

/// Settings of a TCP source, read from `pipeline.<id>.<source>`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpSourceConfig {
    /// `host:port`; `host port` is accepted as well
    pub address: String,
}

impl Default for TcpSourceConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8083".to_string(),
        }
    }
}

impl TcpSourceConfig {
    /// Normalized `host:port` form of the address
    pub fn socket_address(&self) -> String {
        let parts: Vec<&str> = self.address.split_whitespace().collect();
        match parts.as_slice() {
            [host, port] => format!("{}:{}", host, port),
            _ => self.address.trim().to_string(),
        }
    }
}

/// Accepts connections and feeds their lines into the pipeline
pub struct TcpStreamSource {
    name: String,
    listener: TcpListener,
}

impl TcpStreamSource {
    /// Bind the listening socket
    pub async fn bind<S: Into<String>>(name: S, config: &TcpSourceConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.socket_address()).await?;
        let name = name.into();
        info!(source = %name, address = %listener.local_addr()?, "Listening");
        Ok(Self { name, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Source for TcpStreamSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn main(&mut self, pipeline: Arc<Pipeline>, shutdown: StopSignal) -> anyhow::Result<()> {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(source = %self.name, error = %e, "Accept failed");
                            continue;
                        }
                    };
                    debug!(source = %self.name, peer = %peer, "Connection accepted");
                    connections.spawn(serve(
                        self.name.clone(),
                        stream,
                        peer,
                        Arc::clone(&pipeline),
                        shutdown.clone(),
                    ));
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        warn!(source = %self.name, error = %e, "Connection task failed");
                    }
                }
            }
        }

        // Abort connections still open
        connections.shutdown().await;
        Ok(())
    }
}

async fn serve(
    source: String,
    stream: TcpStream,
    peer: SocketAddr,
    pipeline: Arc<Pipeline>,
    shutdown: StopSignal,
) {
    let (reader, mut writer) = stream.into_split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Vec<u8>>(REPLY_BUFFER);

    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = reply_rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut lines = BufReader::new(reader).split(b'\n');
    loop {
        let line = tokio::select! {
            _ = shutdown.wait() => break,
            line = lines.next_segment() => line,
        };

        let mut line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(source = %source, peer = %peer, error = %e, "Read failed");
                break;
            }
        };
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        if !ready_or_shutdown(&pipeline, &shutdown).await {
            break;
        }

        let ctx = Context::new(source.as_str())
            .with_attribute("peer", json!(peer.to_string()))
            .with_reply(reply_tx.clone());

        if let Err(e) = pipeline.process(ctx, Event::Bytes(line)).await {
            debug!(source = %source, peer = %peer, error = %e, "Request failed");
        }
    }

    drop(reply_tx);
    let _ = writer_task.await;
    debug!(source = %source, peer = %peer, "Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::Application;
    use crate::pipeline::{PipelineBuilder, Sink};
    use eventpump_config::PumpConfig;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    struct Echo;

    #[async_trait]
    impl Sink for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn process(&self, ctx: &mut Context, event: Event) -> anyhow::Result<()> {
            if event.as_bytes() == Some(b"fail".as_slice()) {
                anyhow::bail!("refused");
            }
            let reply = ctx
                .reply
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("no reply handle"))?;
            let mut bytes = event.as_bytes().unwrap_or_default().to_vec();
            bytes.push(b'\n');
            reply.send(bytes).await?;
            Ok(())
        }
    }

    #[test]
    fn test_address_forms() {
        let spaced = TcpSourceConfig {
            address: "127.0.0.1 9000".to_string(),
        };
        assert_eq!(spaced.socket_address(), "127.0.0.1:9000");
        assert_eq!(TcpSourceConfig::default().socket_address(), "0.0.0.0:8083");
    }

    #[tokio::test]
    async fn test_echo_round_trip_survives_failures() {
        let app = Application::builder(PumpConfig::default())
            .handle_signals(false)
            .build();
        let source = TcpStreamSource::bind(
            "tcp",
            &TcpSourceConfig {
                address: "127.0.0.1:0".to_string(),
            },
        )
        .await
        .unwrap();
        let address = source.local_addr().unwrap();

        let pipeline = PipelineBuilder::new("echo")
            .source(source)
            .sink(Echo)
            .stop_on_errors(false)
            .build(&app)
            .unwrap();
        let task = pipeline.start().await.unwrap();

        let mut client = TcpStream::connect(address).await.unwrap();
        client.write_all(b"fail\r\nhello\n").await.unwrap();

        let mut buf = [0u8; 6];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"hello\n");
        assert!(pipeline.is_ready());

        app.stop();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
