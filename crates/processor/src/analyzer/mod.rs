//! Analyzers
//!
//! An analyzer is an observer-only processor: for every event it evaluates a
//! cheap predicate and, when it holds, records the event into its own state.
//! The event itself is always forwarded unchanged. Results are read with
//! [`Analyzer::analyze`].

pub mod time_window;

pub use time_window::{CountEvaluator, TimeWindowAnalyzer, WindowEvaluator, WindowSnapshot};

use crate::core::{Context, Event};
use crate::pipeline::{Outcome, PipelineControl, Processor};
use async_trait::async_trait;
use std::sync::Arc;

/// Capability set of an analyzer
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// What `analyze` produces
    type Output;

    fn name(&self) -> &str;

    /// Called once while the owning pipeline bootstraps
    async fn start(&self, _control: &PipelineControl) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether the event is relevant; must not mutate state
    fn predicate(&self, ctx: &Context, event: &Event) -> bool;

    /// Record a relevant event
    fn evaluate(&self, ctx: &Context, event: &Event) -> anyhow::Result<()>;

    /// Read-side extraction of the accumulated results
    fn analyze(&self) -> Self::Output;
}

/// Pipeline stage running an analyzer
///
/// The analyzer stays reachable through the shared handle so results can be
/// read while the pipeline runs.
pub struct AnalyzerProcessor<A: Analyzer> {
    analyzer: Arc<A>,
}

impl<A: Analyzer> AnalyzerProcessor<A> {
    pub fn new(analyzer: Arc<A>) -> Self {
        Self { analyzer }
    }

    pub fn analyzer(&self) -> &Arc<A> {
        &self.analyzer
    }
}

#[async_trait]
impl<A: Analyzer + 'static> Processor for AnalyzerProcessor<A> {
    fn name(&self) -> &str {
        self.analyzer.name()
    }

    async fn start(&self, control: &PipelineControl) -> anyhow::Result<()> {
        self.analyzer.start(control).await
    }

    async fn process(&self, ctx: &mut Context, event: Event) -> anyhow::Result<Outcome> {
        if self.analyzer.predicate(ctx, &event) {
            self.analyzer.evaluate(ctx, &event)?;
        }
        Ok(Outcome::Forward(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct LengthAnalyzer {
        lengths: Mutex<Vec<usize>>,
    }

    impl Analyzer for LengthAnalyzer {
        type Output = usize;

        fn name(&self) -> &str {
            "length"
        }

        fn predicate(&self, _ctx: &Context, event: &Event) -> bool {
            event.len() > 1
        }

        fn evaluate(&self, _ctx: &Context, event: &Event) -> anyhow::Result<()> {
            self.lengths.lock().push(event.len());
            Ok(())
        }

        fn analyze(&self) -> usize {
            self.lengths.lock().iter().sum()
        }
    }

    #[tokio::test]
    async fn test_analyzer_always_forwards() {
        let analyzer = Arc::new(LengthAnalyzer {
            lengths: Mutex::new(Vec::new()),
        });
        let processor = AnalyzerProcessor::new(Arc::clone(&analyzer));
        let mut ctx = Context::new("test");

        for input in ["abc", "x", "hello"] {
            let outcome = processor.process(&mut ctx, Event::from(input)).await.unwrap();
            assert!(matches!(outcome, Outcome::Forward(Event::Text(ref s)) if s == input));
        }

        assert_eq!(analyzer.analyze(), 8);
        assert_eq!(processor.name(), "length");
    }
}
