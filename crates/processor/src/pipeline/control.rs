//! Readiness, throttling and error state of a pipeline
//!
//! A pipeline accepts events only while it is ready, which requires all of:
//! - bootstrap finished (every stage's `start` hook ran)
//! - no error recorded
//! - no active throttle

use crate::application::StopSignal;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct ControlState {
    bootstrapped: bool,
    error: Option<String>,
    throttles: BTreeSet<String>,
}

impl ControlState {
    fn is_ready(&self) -> bool {
        self.bootstrapped && self.error.is_none() && self.throttles.is_empty()
    }
}

struct ControlInner {
    pipeline: String,
    state: Mutex<ControlState>,
    ready: watch::Sender<bool>,
    shutdown: StopSignal,
}

/// Shared handle controlling admission of events into a pipeline
///
/// Cloning is cheap; stages receive a clone in their `start` hook and may
/// keep it to apply backpressure later.
#[derive(Clone)]
pub struct PipelineControl {
    inner: Arc<ControlInner>,
}

impl fmt::Debug for PipelineControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PipelineControl")
            .field("pipeline", &self.inner.pipeline)
            .field("bootstrapped", &state.bootstrapped)
            .field("error", &state.error)
            .field("throttles", &state.throttles)
            .finish()
    }
}

impl PipelineControl {
    pub(crate) fn new(pipeline: &str, shutdown: StopSignal) -> Self {
        let (ready, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(ControlInner {
                pipeline: pipeline.to_string(),
                state: Mutex::new(ControlState::default()),
                ready,
                shutdown,
            }),
        }
    }

    /// Id of the controlled pipeline
    pub fn pipeline(&self) -> &str {
        &self.inner.pipeline
    }

    /// The application stop signal
    pub fn shutdown(&self) -> StopSignal {
        self.inner.shutdown.clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Resolve once the pipeline is ready (immediately if it already is)
    pub async fn ready(&self) {
        let mut rx = self.inner.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Enable or disable a throttle held by `who`
    ///
    /// Throttles are keyed, so several stages can hold one at the same time;
    /// the pipeline stays not-ready until every holder releases it.
    pub fn throttle(&self, who: &str, enable: bool) {
        self.update(|state| {
            let changed = if enable {
                state.throttles.insert(who.to_string())
            } else {
                state.throttles.remove(who)
            };
            if changed {
                debug!(pipeline = %self.inner.pipeline, who = %who, enable, "Throttle changed");
            }
        });
    }

    pub fn is_throttled(&self) -> bool {
        !self.inner.state.lock().throttles.is_empty()
    }

    /// The recorded error message, if the pipeline is in the error state
    pub fn error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }

    pub(crate) fn set_bootstrapped(&self) {
        self.update(|state| state.bootstrapped = true);
    }

    pub(crate) fn set_error(&self, message: String) {
        self.update(|state| state.error = Some(message));
    }

    /// Leave the error state; returns false if there was no error
    pub fn clear_error(&self) -> bool {
        let mut cleared = false;
        self.update(|state| cleared = state.error.take().is_some());
        if cleared {
            info!(pipeline = %self.inner.pipeline, "Pipeline error cleared");
        }
        cleared
    }

    fn update<F: FnOnce(&mut ControlState)>(&self, mutate: F) {
        // Publish under the state lock so concurrent updates reach the watch
        // in the same order they changed the state
        let mut state = self.inner.state.lock();
        mutate(&mut state);
        let ready = state.is_ready();
        self.inner.ready.send_if_modified(|current| {
            if *current == ready {
                false
            } else {
                *current = ready;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn control() -> PipelineControl {
        PipelineControl::new("test", StopSignal::new())
    }

    #[test]
    fn test_not_ready_until_bootstrapped() {
        let control = control();
        assert!(!control.is_ready());
        control.set_bootstrapped();
        assert!(control.is_ready());
    }

    #[test]
    fn test_throttles_are_keyed() {
        let control = control();
        control.set_bootstrapped();

        control.throttle("sink", true);
        control.throttle("source", true);
        assert!(!control.is_ready());

        control.throttle("sink", false);
        assert!(!control.is_ready());
        assert!(control.is_throttled());

        control.throttle("source", false);
        assert!(control.is_ready());
    }

    #[test]
    fn test_error_and_clear() {
        let control = control();
        control.set_bootstrapped();
        control.set_error("boom".to_string());

        assert!(!control.is_ready());
        assert_eq!(control.error().as_deref(), Some("boom"));
        assert!(control.clear_error());
        assert!(!control.clear_error());
        assert!(control.is_ready());
    }

    #[test]
    fn test_concurrent_throttles_settle_on_state() {
        let control = control();
        control.set_bootstrapped();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let control = control.clone();
                scope.spawn(move || {
                    let who = format!("worker-{}", worker);
                    for _ in 0..2_000 {
                        control.throttle(&who, true);
                        control.throttle(&who, false);
                    }
                });
            }
        });

        assert!(!control.is_throttled());
        assert!(control.is_ready());
    }

    #[tokio::test]
    async fn test_ready_wakes_waiter() {
        let control = control();
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.ready().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        control.set_bootstrapped();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
