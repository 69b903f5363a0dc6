//! Stock sources
//!
//! - ChannelSource: events pushed through an in-process mpsc channel
//! - FileLineSource: line-oriented files picked up from a directory
//! - TcpStreamSource: line-oriented TCP server with per-connection replies

pub mod channel;
pub mod file;
pub mod tcp;

pub use channel::ChannelSource;
pub use file::{FileLineSource, FileSourceConfig, PostAction};
pub use tcp::{TcpSourceConfig, TcpStreamSource};

use crate::application::StopSignal;
use crate::pipeline::Pipeline;

/// Wait for the pipeline to become ready; false if shutdown fired first
pub(crate) async fn ready_or_shutdown(pipeline: &Pipeline, shutdown: &StopSignal) -> bool {
    tokio::select! {
        _ = shutdown.wait() => false,
        _ = pipeline.ready() => !shutdown.is_stopped(),
    }
}
