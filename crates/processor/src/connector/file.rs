//! Line-oriented file source
//!
//! Picks files up from a directory one at a time. A file is locked by
//! renaming it to `<name>-locked`; losing that race to another consumer is
//! not an error, the scan simply restarts. Every line becomes one
//! [`Event::Bytes`]. Once a file is consumed the pipeline is flushed and the
//! `post` action applies:
//!
//! - `delete`: remove the file
//! - `move`: rename it to `<name>-processed`
//! - `stop`: rename it back and stop the application (one-shot batch jobs)
//!
//! A file whose processing fails is renamed to `<name>-failed` (or back to
//! its original name with `post: stop`). The directory is rescanned right
//! after each file and on every `tick/10`.

use crate::application::{Application, StopSignal};
use crate::bus::{topics, PubSub, Subscriber, Subscription};
use crate::connector::ready_or_shutdown;
use crate::core::{Context, Event};
use crate::error::PumpError;
use crate::pipeline::{Pipeline, Source};
use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

const LOCKED_SUFFIX: &str = "-locked";
const PROCESSED_SUFFIX: &str = "-processed";
const FAILED_SUFFIX: &str = "-failed";

/// What happens to a file after it was fully read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    Delete,
    Stop,
    Move,
}

impl PostAction {
    /// Parse a `post` value; unknown values fall back to `Move`
    pub fn parse(value: &str) -> Self {
        match value {
            "delete" => PostAction::Delete,
            "stop" => PostAction::Stop,
            "move" => PostAction::Move,
            other => {
                warn!(post = %other, "Unknown 'post' value, defaulting to 'move'");
                PostAction::Move
            }
        }
    }
}

/// Settings of a file source, read from `pipeline.<id>.<source>`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileSourceConfig {
    /// Directory to scan, or a single file
    pub path: PathBuf,
    /// One of `delete`, `stop`, `move`
    pub post: String,
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            post: "stop".to_string(),
        }
    }
}

enum FileOutcome {
    Next,
    Stop,
}

/// Reads files line by line
pub struct FileLineSource {
    name: String,
    path: PathBuf,
    post: PostAction,
    bus: Arc<PubSub>,
    health: Arc<Notify>,
    subscription: Option<Subscription>,
}

struct HealthCheck {
    notify: Arc<Notify>,
}

#[async_trait]
impl Subscriber for HealthCheck {
    async fn on_message(&self, _topic: &str, _payload: &Value) -> anyhow::Result<()> {
        self.notify.notify_one();
        Ok(())
    }
}

impl FileLineSource {
    pub fn new<S: Into<String>>(app: &Application, name: S, config: FileSourceConfig) -> Self {
        let health = Arc::new(Notify::new());
        let subscription = app.bus().subscribe(
            topics::TICK_10,
            Arc::new(HealthCheck {
                notify: Arc::clone(&health),
            }),
        );

        Self {
            name: name.into(),
            path: config.path,
            post: PostAction::parse(&config.post),
            bus: Arc::clone(app.bus()),
            health,
            subscription: Some(subscription),
        }
    }

    /// Create the source from the `pipeline.<id>.<name>` section
    pub fn from_config(app: &Application, pipeline_id: &str, name: &str) -> crate::error::Result<Self> {
        let config: FileSourceConfig = app.config().stage(pipeline_id, name)?;
        if config.path.as_os_str().is_empty() {
            return Err(PumpError::Configuration(format!(
                "pipeline.{}.{}.path is required",
                pipeline_id, name
            )));
        }
        Ok(Self::new(app, name, config))
    }

    pub fn post(&self) -> PostAction {
        self.post
    }

    fn file_context(&self, path: &Path) -> Context {
        Context::new(self.name.as_str()).with_attribute("filename", json!(path.display().to_string()))
    }

    /// First unclaimed file, in name order
    async fn scan(&self) -> std::io::Result<Option<PathBuf>> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        if metadata.is_file() {
            return Ok(Some(self.path.clone()));
        }

        let mut candidates = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || is_claimed(&path) {
                continue;
            }
            candidates.push(path);
        }

        candidates.sort();
        Ok(candidates.into_iter().next())
    }

    async fn read_file(
        &self,
        pipeline: &Pipeline,
        shutdown: &StopSignal,
        path: &Path,
    ) -> FileOutcome {
        let locked = with_suffix(path, LOCKED_SUFFIX);
        debug!(source = %self.name, file = %path.display(), "Locking file");

        match tokio::fs::rename(path, &locked).await {
            Ok(()) => {}
            // Someone else claimed it first
            Err(e) if e.kind() == ErrorKind::NotFound => return FileOutcome::Next,
            Err(e) => {
                error!(source = %self.name, file = %path.display(), error = %e, "Cannot lock file");
                pipeline.set_error(&e, Some(&self.file_context(path)));
                return FileOutcome::Next;
            }
        }

        debug!(source = %self.name, file = %path.display(), "Processing file");
        let read = self.read_lines(pipeline, shutdown, path, &locked).await;

        match read {
            Ok(true) => {}
            Ok(false) => {
                // Interrupted by shutdown: put it back to be read again
                if let Err(e) = tokio::fs::rename(&locked, path).await {
                    error!(source = %self.name, file = %path.display(), error = %e, "Cannot unlock file");
                }
                return FileOutcome::Stop;
            }
            Err(e) => {
                error!(source = %self.name, file = %path.display(), error = %e, "File processing failed");
                let target = match self.post {
                    PostAction::Stop => path.to_path_buf(),
                    _ => with_suffix(path, FAILED_SUFFIX),
                };
                if let Err(e) = tokio::fs::rename(&locked, &target).await {
                    error!(source = %self.name, file = %path.display(), error = %e, "Cannot finalize file");
                }
                return FileOutcome::Next;
            }
        }

        info!(source = %self.name, file = %path.display(), "File processed");
        if let Err(e) = pipeline.flush().await {
            warn!(source = %self.name, error = %e, "Flush after file failed");
        }

        let finalized = match self.post {
            PostAction::Delete => tokio::fs::remove_file(&locked).await,
            PostAction::Stop => tokio::fs::rename(&locked, path).await,
            PostAction::Move => tokio::fs::rename(&locked, with_suffix(path, PROCESSED_SUFFIX)).await,
        };

        if let Err(e) = finalized {
            error!(source = %self.name, file = %path.display(), error = %e, "Cannot finalize file");
            pipeline.set_error(&e, Some(&self.file_context(path)));
            return FileOutcome::Next;
        }

        match self.post {
            PostAction::Stop => {
                shutdown.stop();
                FileOutcome::Stop
            }
            _ => FileOutcome::Next,
        }
    }

    /// Returns false when shutdown interrupted the file
    async fn read_lines(
        &self,
        pipeline: &Pipeline,
        shutdown: &StopSignal,
        path: &Path,
        locked: &Path,
    ) -> anyhow::Result<bool> {
        let file = tokio::fs::File::open(locked)
            .await
            .map_err(|e| PumpError::Processing(format!("the file '{}' could not be read: {}", path.display(), e)))?;
        let mut lines = BufReader::new(file).split(b'\n');
        let filename = json!(path.display().to_string());

        let mut line_number = 0u64;
        while let Some(mut line) = lines
            .next_segment()
            .await
            .with_context(|| format!("reading '{}'", path.display()))?
        {
            line_number += 1;
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if !ready_or_shutdown(pipeline, shutdown).await {
                return Ok(false);
            }

            let ctx = Context::new(self.name.as_str())
                .with_attribute("filename", filename.clone())
                .with_attribute("line", json!(line_number));

            match pipeline.process(ctx, Event::Bytes(line)).await {
                Ok(()) => {}
                // Per-event failure while the pipeline keeps going
                Err(e) if pipeline.is_ready() => {
                    debug!(source = %self.name, line = line_number, error = %e, "Line rejected");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(true)
    }
}

#[async_trait]
impl Source for FileLineSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn main(&mut self, pipeline: Arc<Pipeline>, shutdown: StopSignal) -> anyhow::Result<()> {
        loop {
            if shutdown.is_stopped() {
                break;
            }

            match self.scan().await {
                Ok(Some(path)) => {
                    if !ready_or_shutdown(&pipeline, &shutdown).await {
                        break;
                    }
                    match self.read_file(&pipeline, &shutdown, &path).await {
                        FileOutcome::Next => continue,
                        FileOutcome::Stop => break,
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(source = %self.name, path = %self.path.display(), error = %e, "Scan failed"),
            }

            tokio::select! {
                _ = shutdown.wait() => break,
                _ = self.health.notified() => {}
            }
        }

        if let Some(subscription) = self.subscription.take() {
            self.bus.unsubscribe(&subscription);
        }
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn is_claimed(path: &Path) -> bool {
    let name = path.to_string_lossy();
    [LOCKED_SUFFIX, PROCESSED_SUFFIX, FAILED_SUFFIX]
        .iter()
        .any(|suffix| name.ends_with(suffix))
}
