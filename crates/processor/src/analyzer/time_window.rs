//! Time-window analyzer
//!
//! Records accepted events into a [`TimeWindowMatrix`]: the evaluator locates
//! the row key and timestamp of an event, and accumulates into the cells of
//! the matching (row, column). Events outside the window are skipped.
//!
//! When clock-driven, the analyzer advances the window to the current time on
//! a timer firing every quarter of the column width, which keeps the window
//! within the advance margin even with one timer period of delay.

use crate::analyzer::Analyzer;
use crate::application::StopSignal;
use crate::core::{unix_now, Context, Event, EventTimeExtractor};
use crate::error::Result;
use crate::pipeline::PipelineControl;
use crate::window::{Cell, MatrixConfig, SharedMatrix, TimeWindowMatrix};
use async_trait::async_trait;
use eventpump_config::PumpConfig;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Decides where and how an event is recorded
pub trait WindowEvaluator: Send + Sync {
    type Cell: Cell;

    fn predicate(&self, _ctx: &Context, _event: &Event) -> bool {
        true
    }

    /// Row key and unix timestamp of the event, `None` to skip it
    fn locate(&self, ctx: &Context, event: &Event) -> Option<(String, f64)>;

    /// Update the `depth` cells of the located (row, column)
    fn accumulate(&self, cells: &mut [Self::Cell], ctx: &Context, event: &Event);
}

/// Counts events per row key
pub struct CountEvaluator<T: Cell = f64> {
    key_field: Option<String>,
    time: Box<dyn EventTimeExtractor>,
    _cell: PhantomData<fn() -> T>,
}

/// Row key used when no key field is configured
pub const DEFAULT_ROW: &str = "*";

impl<T: Cell> CountEvaluator<T> {
    pub fn new<E: EventTimeExtractor + 'static>(time: E) -> Self {
        Self {
            key_field: None,
            time: Box::new(time),
            _cell: PhantomData,
        }
    }

    /// Use a record field as the row key; events without it are skipped
    pub fn with_key_field<S: Into<String>>(mut self, field: S) -> Self {
        self.key_field = Some(field.into());
        self
    }
}

impl<T: Cell> WindowEvaluator for CountEvaluator<T> {
    type Cell = T;

    fn locate(&self, ctx: &Context, event: &Event) -> Option<(String, f64)> {
        let timestamp = self.time.extract_event_time(ctx, event)?;

        let key = match &self.key_field {
            None => DEFAULT_ROW.to_string(),
            Some(field) => match event.as_record()?.get(field)? {
                Value::String(s) => s.clone(),
                Value::Null => return None,
                other => other.to_string(),
            },
        };

        Some((key, timestamp))
    }

    fn accumulate(&self, cells: &mut [T], _ctx: &Context, _event: &Event) {
        cells[0] += T::one();
    }
}

/// Read-side view of a time window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSnapshot {
    pub matrix: String,
    /// Lower bound of the oldest column
    pub start: f64,
    /// Upper bound of the newest column
    pub end: f64,
    pub resolution: f64,
    /// First-dimension values per row key, oldest column first
    pub rows: BTreeMap<String, Vec<f64>>,
    pub populated_columns: usize,
    /// Events that could not be located or fell outside the window
    pub skipped: u64,
}

impl WindowSnapshot {
    /// Sum over all rows per column
    pub fn column_totals(&self) -> Vec<f64> {
        let columns = self.rows.values().map(Vec::len).max().unwrap_or(0);
        let mut totals = vec![0.0; columns];
        for values in self.rows.values() {
            for (total, value) in totals.iter_mut().zip(values) {
                *total += value;
            }
        }
        totals
    }

    pub fn total(&self) -> f64 {
        self.rows.values().flatten().sum()
    }
}

/// Analyzer accumulating events into a time-window matrix
pub struct TimeWindowAnalyzer<E: WindowEvaluator> {
    name: String,
    evaluator: E,
    matrix: SharedMatrix<E::Cell>,
    clock_driven: bool,
    clock: Mutex<Option<JoinHandle<()>>>,
    skipped: AtomicU64,
}

impl<E: WindowEvaluator> TimeWindowAnalyzer<E> {
    /// Create an analyzer with its own matrix, named `<name>Matrix`
    pub fn new<S: Into<String>>(name: S, evaluator: E, config: &MatrixConfig) -> Result<Self> {
        let name = name.into();
        let matrix = TimeWindowMatrix::new(format!("{}Matrix", name), config)?;
        Ok(Self::with_matrix(name, evaluator, matrix.shared()))
    }

    /// Create an analyzer whose matrix shape comes from `pipeline.<id>.<name>`
    pub fn from_config<S: Into<String>>(
        config: &PumpConfig,
        pipeline_id: &str,
        name: S,
        evaluator: E,
    ) -> Result<Self> {
        let name = name.into();
        let matrix_config: MatrixConfig = config.stage(pipeline_id, &name)?;
        Self::new(name, evaluator, &matrix_config)
    }

    /// Create an analyzer bound to an existing, possibly shared, matrix
    pub fn with_matrix<S: Into<String>>(
        name: S,
        evaluator: E,
        matrix: SharedMatrix<E::Cell>,
    ) -> Self {
        Self {
            name: name.into(),
            evaluator,
            matrix,
            clock_driven: true,
            clock: Mutex::new(None),
            skipped: AtomicU64::new(0),
        }
    }

    /// Advance on a timer (default) or only through [`advance`](Self::advance)
    pub fn clock_driven(mut self, enabled: bool) -> Self {
        self.clock_driven = enabled;
        self
    }

    pub fn is_clock_driven(&self) -> bool {
        self.clock_driven
    }

    pub fn matrix(&self) -> &SharedMatrix<E::Cell> {
        &self.matrix
    }

    /// Advance the window to cover `target`; returns the columns added
    pub fn advance(&self, target: f64) -> usize {
        self.matrix.lock().advance(target)
    }

    /// Spawn the timer advancing the window until `shutdown` fires
    pub fn spawn_clock(&self, shutdown: StopSignal) -> JoinHandle<()> {
        let matrix = Arc::clone(&self.matrix);
        let resolution = matrix.lock().resolution();
        let period = Duration::from_secs_f64(resolution / 4.0);
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = interval.tick() => {
                        let added = matrix.lock().advance(unix_now());
                        if added > 0 {
                            trace!(analyzer = %name, added, "Clock advanced window");
                        }
                    }
                }
            }
            debug!(analyzer = %name, "Window clock stopped");
        })
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    fn skip(&self, reason: &str) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        trace!(analyzer = %self.name, reason, "Event skipped");
    }
}

impl<E: WindowEvaluator> Drop for TimeWindowAnalyzer<E> {
    fn drop(&mut self) {
        if let Some(clock) = self.clock.get_mut().take() {
            clock.abort();
        }
    }
}

#[async_trait]
impl<E: WindowEvaluator> Analyzer for TimeWindowAnalyzer<E> {
    type Output = WindowSnapshot;

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, control: &PipelineControl) -> anyhow::Result<()> {
        if self.clock_driven {
            let clock = self.spawn_clock(control.shutdown());
            if let Some(previous) = self.clock.lock().replace(clock) {
                previous.abort();
            }
        }
        Ok(())
    }

    fn predicate(&self, ctx: &Context, event: &Event) -> bool {
        self.evaluator.predicate(ctx, event)
    }

    fn evaluate(&self, ctx: &Context, event: &Event) -> anyhow::Result<()> {
        let Some((key, timestamp)) = self.evaluator.locate(ctx, event) else {
            self.skip("unlocated");
            return Ok(());
        };

        let mut matrix = self.matrix.lock();
        let Some(column) = matrix.get_column(timestamp) else {
            drop(matrix);
            self.skip("outside window");
            return Ok(());
        };

        let row = matrix.add_row(&key);
        let cells = matrix.cells_mut(row, column)?;
        self.evaluator.accumulate(cells, ctx, event);
        Ok(())
    }

    fn analyze(&self) -> WindowSnapshot {
        let matrix = self.matrix.lock();

        let rows = matrix
            .row_names()
            .iter()
            .enumerate()
            .map(|(index, key)| {
                let values = matrix
                    .row_values(index, 0)
                    .unwrap_or_default()
                    .into_iter()
                    .map(Cell::to_f64)
                    .collect();
                (key.clone(), values)
            })
            .collect();

        WindowSnapshot {
            matrix: matrix.id().to_string(),
            start: matrix.start(),
            end: matrix.end(),
            resolution: matrix.resolution(),
            rows,
            populated_columns: matrix.populated_columns(),
            skipped: self.skipped(),
        }
    }
}
