//! Event pump runtime
//!
//! This crate provides a long-running event pipeline runtime:
//! - `application`: lifecycle governor (init, run with periodic tick, exit)
//! - `bus`: topic-keyed publish/subscribe register
//! - `pipeline`: source -> processors -> sink chains with readiness gating
//! - `window` and `analyzer`: time-bucketed accumulation of events
//! - `service`: registry starting and stopping pipelines with the governor
//! - `common` and `connector`: stock stages and sources

pub mod analyzer;
pub mod application;
pub mod bus;
pub mod common;
pub mod connector;
pub mod core;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod service;
pub mod window;

// Re-export commonly used types
pub use application::{AppState, Application, ExitStatus, Module, StopSignal};

pub use bus::{topics, PubSub, PublishReport, Subscriber, Subscription};

pub use core::{Context, Event, EventTimeExtractor, JsonFieldTime, ReceivedTime};

pub use error::{MatrixError, PumpError, Result};

pub use pipeline::{
    FilterProcessor, FlatMapProcessor, MapProcessor, Outcome, Pipeline, PipelineBuilder,
    PipelineControl, Processor, Sink, Source,
};

pub use analyzer::{
    Analyzer, AnalyzerProcessor, CountEvaluator, TimeWindowAnalyzer, WindowEvaluator,
    WindowSnapshot,
};

pub use window::{Cell, MatrixConfig, SharedMatrix, TimeWindowMatrix};

pub use service::PumpService;

pub use metrics::MetricsRegistry;
