//! Error types for the event pump
//!
//! This module provides the error taxonomy shared by the application governor,
//! the event bus, pipelines and the time-window matrix.

use thiserror::Error;

/// Main runtime error type
#[derive(Error, Debug)]
pub enum PumpError {
    /// Pipeline received an event before it became ready
    #[error("pipeline '{pipeline}' is not ready to process events")]
    NotReady { pipeline: String },

    /// A service, pipeline, matrix or connection name is already taken
    #[error("{kind} '{name}' already registered")]
    DuplicateRegistration { kind: &'static str, name: String },

    /// A service, pipeline, matrix or connection lookup failed
    #[error("cannot find {kind} '{name}'")]
    NotFound { kind: &'static str, name: String },

    /// A registered object exists but has a different type than requested
    #[error("{kind} '{name}' is not of type {expected}")]
    TypeMismatch {
        kind: &'static str,
        name: String,
        expected: &'static str,
    },

    /// A source, processor or sink failed while handling an event
    #[error("stage '{stage}' of pipeline '{pipeline}' failed: {source}")]
    Stage {
        pipeline: String,
        stage: String,
        source: anyhow::Error,
    },

    /// Domain-specific input problem, e.g. a file that cannot be read
    #[error("processing error: {0}")]
    Processing(String),

    /// A subscriber of a lifecycle topic failed; the application cannot continue
    #[error("fatal failure in lifecycle topic '{topic}': {source}")]
    Lifecycle {
        topic: String,
        source: anyhow::Error,
    },

    /// Governor operation invoked in the wrong phase
    #[error("invalid application state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Time-window matrix errors
    #[error("matrix error: {0}")]
    Matrix(#[from] MatrixError),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PumpError {
    /// Whether the error must terminate the application
    pub fn is_fatal(&self) -> bool {
        matches!(self, PumpError::Lifecycle { .. })
    }
}

/// Time-window matrix construction and lookup errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatrixError {
    /// Zero columns or zero depth
    #[error("invalid matrix dimensions: columns={columns}, depth={depth}")]
    InvalidDimensions { columns: usize, depth: usize },

    /// Column width must be positive and finite
    #[error("invalid resolution: {resolution}s, must be greater than 0")]
    InvalidResolution { resolution: f64 },

    /// Row index out of range
    #[error("unknown row index {index} (rows: {rows})")]
    UnknownRow { index: usize, rows: usize },

    /// Column index out of range
    #[error("column index {index} out of range (columns: {columns})")]
    ColumnOutOfRange { index: usize, columns: usize },

    /// Third-dimension index out of range
    #[error("dimension index {index} out of range (depth: {depth})")]
    DimensionOutOfRange { index: usize, depth: usize },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, PumpError>;

/// Result type alias for matrix operations
pub type MatrixResult<T> = std::result::Result<T, MatrixError>;

impl From<serde_json::Error> for PumpError {
    fn from(err: serde_json::Error) -> Self {
        PumpError::Serialization(err.to_string())
    }
}

impl From<eventpump_config::ConfigError> for PumpError {
    fn from(err: eventpump_config::ConfigError) -> Self {
        PumpError::Configuration(err.to_string())
    }
}
