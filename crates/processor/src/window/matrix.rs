//! Sliding time-window matrix
//!
//! A fixed number of time columns, each `resolution` seconds wide, holding one
//! accumulator per (row, dimension). Rows are keyed by string and added on
//! demand. Columns are kept oldest-first in a ring buffer: advancing the
//! window pushes a zeroed column at the head and evicts the oldest one.
//!
//! ```text
//!  start                                   end
//!    |  col 0  |  col 1  |  ...  | col n-1 |
//!    oldest                          newest
//! ```
//!
//! The window covers `[start, start + columns * resolution)`.

use crate::core::unix_now;
use crate::error::{MatrixError, MatrixResult};
use crate::window::cell::Cell;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::trace;

/// Advancing keeps at least this fraction of a column ahead of the target
pub const ADVANCE_MARGIN: f64 = 0.25;

/// A matrix shared between analyzers
pub type SharedMatrix<T = f64> = Arc<Mutex<TimeWindowMatrix<T>>>;

/// Shape of a time-window matrix
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Number of time columns
    pub columns: usize,
    /// Number of accumulators per (row, column)
    pub depth: usize,
    /// Column width in seconds
    pub resolution: f64,
    /// Lower bound of the oldest column, unix seconds
    ///
    /// When absent the newest column starts at the current time and the
    /// older columns reach back into the past.
    pub start_time: Option<f64>,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            columns: 15,
            depth: 1,
            resolution: 60.0,
            start_time: None,
        }
    }
}

impl MatrixConfig {
    pub fn new(columns: usize, resolution: f64) -> Self {
        Self {
            columns,
            resolution,
            ..Self::default()
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn validate(&self) -> MatrixResult<()> {
        if self.columns == 0 || self.depth == 0 {
            return Err(MatrixError::InvalidDimensions {
                columns: self.columns,
                depth: self.depth,
            });
        }

        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(MatrixError::InvalidResolution {
                resolution: self.resolution,
            });
        }

        Ok(())
    }
}

/// Time-bucketed accumulators
#[derive(Debug, Clone)]
pub struct TimeWindowMatrix<T: Cell = f64> {
    id: String,
    resolution: f64,
    capacity: usize,
    depth: usize,
    start: f64,
    // Oldest first; each column is `rows * depth` cells, row-major
    columns: VecDeque<Vec<T>>,
    rows: HashMap<String, usize>,
    row_names: Vec<String>,
}

impl<T: Cell> TimeWindowMatrix<T> {
    pub fn new<S: Into<String>>(id: S, config: &MatrixConfig) -> MatrixResult<Self> {
        config.validate()?;

        let columns = (0..config.columns).map(|_| Vec::new()).collect();
        Ok(Self {
            id: id.into(),
            resolution: config.resolution,
            capacity: config.columns,
            depth: config.depth,
            start: config
                .start_time
                .unwrap_or_else(|| unix_now() - (config.columns - 1) as f64 * config.resolution),
            columns,
            rows: HashMap::new(),
            row_names: Vec::new(),
        })
    }

    /// Wrap into a handle shareable between analyzers
    pub fn shared(self) -> SharedMatrix<T> {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Number of time columns
    pub fn columns(&self) -> usize {
        self.capacity
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn format(&self) -> &'static str {
        T::FORMAT
    }

    /// Lower bound of the oldest column
    pub fn start(&self) -> f64 {
        self.start
    }

    /// Upper bound of the newest column
    pub fn end(&self) -> f64 {
        self.start + self.capacity as f64 * self.resolution
    }

    // Rows

    /// Index of the row for `key`, creating it if needed
    pub fn add_row(&mut self, key: &str) -> usize {
        if let Some(&index) = self.rows.get(key) {
            return index;
        }

        let index = self.row_names.len();
        self.rows.insert(key.to_string(), index);
        self.row_names.push(key.to_string());

        let width = self.row_names.len() * self.depth;
        for column in self.columns.iter_mut() {
            column.resize(width, T::default());
        }

        trace!(matrix = %self.id, key = %key, index, "Row added");
        index
    }

    pub fn get_row_index(&self, key: &str) -> Option<usize> {
        self.rows.get(key).copied()
    }

    pub fn row_count(&self) -> usize {
        self.row_names.len()
    }

    /// Row keys in index order
    pub fn row_names(&self) -> &[String] {
        &self.row_names
    }

    // Columns

    /// Column holding `timestamp` (0 = oldest), or `None` outside the window
    pub fn get_column(&self, timestamp: f64) -> Option<usize> {
        if !timestamp.is_finite() || timestamp < self.start || timestamp >= self.end() {
            return None;
        }

        let index = ((timestamp - self.start) / self.resolution).floor() as usize;
        Some(index.min(self.capacity - 1))
    }

    /// Append a zeroed column at the head and evict the oldest one
    pub fn add_column(&mut self) {
        self.columns.pop_front();
        self.columns
            .push_back(vec![T::default(); self.row_names.len() * self.depth]);
        self.start += self.resolution;
    }

    /// Add columns until `target` lies at least a quarter column before the end
    ///
    /// Returns the number of column widths the window moved by; repeated
    /// calls with a non-increasing target add nothing.
    pub fn advance(&mut self, target: f64) -> usize {
        if !target.is_finite() {
            return 0;
        }

        let lead = (self.end() - target) / self.resolution;
        if lead > ADVANCE_MARGIN {
            return 0;
        }

        // Smallest n with lead + n > margin; kept in f64 so far targets cannot overflow
        let needed = (ADVANCE_MARGIN - lead).floor() + 1.0;
        let needed = if needed >= self.capacity as f64 {
            // Every retained column would be evicted anyway
            let width = self.row_names.len() * self.depth;
            for column in self.columns.iter_mut() {
                column.clear();
                column.resize(width, T::default());
            }
            self.start += needed * self.resolution;
            // Saturates for targets beyond any representable column count
            needed as usize
        } else {
            let needed = needed as usize;
            for _ in 0..needed {
                self.add_column();
            }
            needed
        };

        trace!(matrix = %self.id, added = needed, start = self.start, "Window advanced");
        needed
    }

    // Cells

    fn offset(&self, row: usize, column: usize, dimension: usize) -> MatrixResult<usize> {
        self.check_row(row)?;
        self.check_column(column)?;
        if dimension >= self.depth {
            return Err(MatrixError::DimensionOutOfRange {
                index: dimension,
                depth: self.depth,
            });
        }
        Ok(row * self.depth + dimension)
    }

    fn check_row(&self, row: usize) -> MatrixResult<()> {
        if row >= self.row_names.len() {
            return Err(MatrixError::UnknownRow {
                index: row,
                rows: self.row_names.len(),
            });
        }
        Ok(())
    }

    fn check_column(&self, column: usize) -> MatrixResult<()> {
        if column >= self.capacity {
            return Err(MatrixError::ColumnOutOfRange {
                index: column,
                columns: self.capacity,
            });
        }
        Ok(())
    }

    pub fn get(&self, row: usize, column: usize, dimension: usize) -> MatrixResult<T> {
        let offset = self.offset(row, column, dimension)?;
        Ok(self.columns[column][offset])
    }

    pub fn set(&mut self, row: usize, column: usize, dimension: usize, value: T) -> MatrixResult<()> {
        let offset = self.offset(row, column, dimension)?;
        self.columns[column][offset] = value;
        Ok(())
    }

    /// Add `value` to one cell
    pub fn accumulate(
        &mut self,
        row: usize,
        column: usize,
        dimension: usize,
        value: T,
    ) -> MatrixResult<()> {
        let offset = self.offset(row, column, dimension)?;
        self.columns[column][offset] += value;
        Ok(())
    }

    /// All `depth` cells of one (row, column)
    pub fn cells_mut(&mut self, row: usize, column: usize) -> MatrixResult<&mut [T]> {
        let offset = self.offset(row, column, 0)?;
        let depth = self.depth;
        Ok(&mut self.columns[column][offset..offset + depth])
    }

    /// Values of one row and dimension, oldest column first
    pub fn row_values(&self, row: usize, dimension: usize) -> MatrixResult<Vec<T>> {
        self.offset(row, 0, dimension)?;
        let offset = row * self.depth + dimension;
        Ok(self.columns.iter().map(|column| column[offset]).collect())
    }

    /// Number of columns with at least one non-zero cell
    pub fn populated_columns(&self) -> usize {
        self.columns
            .iter()
            .filter(|column| column.iter().any(|cell| !cell.is_zero()))
            .count()
    }
}
