//! Time-window aggregation
//!
//! This module provides the sliding matrix of time-bucketed accumulators used
//! by the time-window analyzers.

pub mod cell;
pub mod matrix;

pub use cell::Cell;
pub use matrix::{MatrixConfig, SharedMatrix, TimeWindowMatrix, ADVANCE_MARGIN};
