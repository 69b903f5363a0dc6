//! Stage contracts and generic processors
//!
//! This module provides the capability interfaces a pipeline is composed of:
//! - Source: produces events and injects them with `Pipeline::process`
//! - Processor: transforms, fans out or drops an event
//! - Sink: the terminal side effect
//!
//! and the closure-based processors:
//! - MapProcessor: one event in, one event out
//! - FilterProcessor: drop events failing a predicate
//! - FlatMapProcessor: one event in, zero or more events out

use crate::application::StopSignal;
use crate::core::{Context, Event};
use crate::pipeline::control::PipelineControl;
use crate::pipeline::executor::Pipeline;
use async_trait::async_trait;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Result of a processor invocation
pub enum Outcome {
    /// Pass a (possibly new) event to the next stage
    Forward(Event),
    /// Pass each produced event to the next stage, in order
    Fanout(Box<dyn Iterator<Item = Event> + Send>),
    /// Terminate the event here
    Drop,
}

impl Outcome {
    /// Fan out a collection of events
    pub fn fanout<I>(events: I) -> Self
    where
        I: IntoIterator<Item = Event>,
        I::IntoIter: Send + 'static,
    {
        Outcome::Fanout(Box::new(events.into_iter()))
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Forward(event) => f.debug_tuple("Forward").field(event).finish(),
            Outcome::Fanout(_) => f.write_str("Fanout(..)"),
            Outcome::Drop => f.write_str("Drop"),
        }
    }
}

/// A transforming stage
#[async_trait]
pub trait Processor: Send + Sync {
    /// Stage name, used in errors and logs
    fn name(&self) -> &str;

    /// Called once while the pipeline bootstraps
    async fn start(&self, _control: &PipelineControl) -> anyhow::Result<()> {
        Ok(())
    }

    /// Process one event
    async fn process(&self, ctx: &mut Context, event: Event) -> anyhow::Result<Outcome>;

    /// Drain buffered state
    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The terminal stage of a pipeline
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, _control: &PipelineControl) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process(&self, ctx: &mut Context, event: Event) -> anyhow::Result<()>;

    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The producing stage of a pipeline
///
/// `main` runs in its own task once the pipeline is started. It is expected
/// to await `pipeline.ready()` before emitting, to apply backpressure to its
/// external input while the pipeline is not ready, and to return once
/// `shutdown` fires.
#[async_trait]
pub trait Source: Send {
    fn name(&self) -> &str;

    async fn main(&mut self, pipeline: Arc<Pipeline>, shutdown: StopSignal) -> anyhow::Result<()>;
}

/// Map processor - transforms events one-to-one
///
/// # Example
///
/// ```rust
/// use eventpump::core::Event;
/// use eventpump::pipeline::MapProcessor;
///
/// let upper = MapProcessor::new("upper", |event: Event| {
///     Ok(Event::from(event.to_string().to_uppercase()))
/// });
/// ```
pub struct MapProcessor<F>
where
    F: Fn(Event) -> anyhow::Result<Event> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> MapProcessor<F>
where
    F: Fn(Event) -> anyhow::Result<Event> + Send + Sync,
{
    pub fn new<S: Into<String>>(name: S, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> fmt::Debug for MapProcessor<F>
where
    F: Fn(Event) -> anyhow::Result<Event> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapProcessor")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Processor for MapProcessor<F>
where
    F: Fn(Event) -> anyhow::Result<Event> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _ctx: &mut Context, event: Event) -> anyhow::Result<Outcome> {
        Ok(Outcome::Forward((self.func)(event)?))
    }
}

/// Filter processor - drops events for which the predicate is false
pub struct FilterProcessor<F>
where
    F: Fn(&Context, &Event) -> bool + Send + Sync,
{
    name: String,
    predicate: F,
}

impl<F> FilterProcessor<F>
where
    F: Fn(&Context, &Event) -> bool + Send + Sync,
{
    pub fn new<S: Into<String>>(name: S, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> fmt::Debug for FilterProcessor<F>
where
    F: Fn(&Context, &Event) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterProcessor")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Processor for FilterProcessor<F>
where
    F: Fn(&Context, &Event) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, ctx: &mut Context, event: Event) -> anyhow::Result<Outcome> {
        if (self.predicate)(ctx, &event) {
            Ok(Outcome::Forward(event))
        } else {
            Ok(Outcome::Drop)
        }
    }
}

/// FlatMap processor - a generator producing zero or more events per input
///
/// # Example
///
/// ```rust
/// use eventpump::core::Event;
/// use eventpump::pipeline::FlatMapProcessor;
///
/// let words = FlatMapProcessor::new("words", |event: Event| {
///     event
///         .to_string()
///         .split_whitespace()
///         .map(|w| Event::from(w.to_string()))
///         .collect::<Vec<_>>()
/// });
/// ```
pub struct FlatMapProcessor<F, I>
where
    F: Fn(Event) -> I + Send + Sync,
    I: IntoIterator<Item = Event>,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> I>,
}

impl<F, I> FlatMapProcessor<F, I>
where
    F: Fn(Event) -> I + Send + Sync,
    I: IntoIterator<Item = Event>,
{
    pub fn new<S: Into<String>>(name: S, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, I> fmt::Debug for FlatMapProcessor<F, I>
where
    F: Fn(Event) -> I + Send + Sync,
    I: IntoIterator<Item = Event>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatMapProcessor")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, I> Processor for FlatMapProcessor<F, I>
where
    F: Fn(Event) -> I + Send + Sync,
    I: IntoIterator<Item = Event> + Send,
    I::IntoIter: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _ctx: &mut Context, event: Event) -> anyhow::Result<Outcome> {
        Ok(Outcome::fanout((self.func)(event)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_map_processor() {
        let processor = MapProcessor::new("upper", |event: Event| {
            Ok(Event::from(event.to_string().to_uppercase()))
        });
        let mut ctx = Context::new("test");

        let outcome = processor.process(&mut ctx, Event::from("abc")).await.unwrap();
        assert!(matches!(outcome, Outcome::Forward(Event::Text(ref s)) if s == "ABC"));
        assert_eq!(processor.name(), "upper");
    }

    #[tokio::test]
    async fn test_map_processor_propagates_failure() {
        let processor = MapProcessor::new("fail", |_event: Event| anyhow::bail!("bad input"));
        let mut ctx = Context::new("test");
        assert!(processor.process(&mut ctx, Event::from("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_filter_processor() {
        let processor = FilterProcessor::new("non-empty", |_ctx: &Context, event: &Event| {
            !event.is_empty()
        });
        let mut ctx = Context::new("test");

        let kept = processor.process(&mut ctx, Event::from("x")).await.unwrap();
        assert!(matches!(kept, Outcome::Forward(_)));

        let dropped = processor.process(&mut ctx, Event::from("")).await.unwrap();
        assert!(matches!(dropped, Outcome::Drop));
    }

    #[tokio::test]
    async fn test_flat_map_processor() {
        let processor = FlatMapProcessor::new("split", |event: Event| {
            event
                .to_string()
                .split(',')
                .map(|s| Event::from(s.to_string()))
                .collect::<Vec<_>>()
        });
        let mut ctx = Context::new("test");

        match processor.process(&mut ctx, Event::from("a,b,c")).await.unwrap() {
            Outcome::Fanout(events) => {
                let events: Vec<String> = events.map(|e| e.to_string()).collect();
                assert_eq!(events, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
