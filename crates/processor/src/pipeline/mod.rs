//! Pipeline engine
//!
//! A pipeline is a linear chain of one source, zero or more processors and a
//! terminal stage:
//! - Stage contracts (`Source`, `Processor`, `Sink`) and closure processors
//! - Builder validating the chain
//! - Readiness gating, throttling and the `stop_on_errors` policy
//!
//! # Example
//!
//! ```rust,no_run
//! use eventpump::application::Application;
//! use eventpump::common::PrintSink;
//! use eventpump::connector::ChannelSource;
//! use eventpump::core::{Context, Event};
//! use eventpump::pipeline::{MapProcessor, PipelineBuilder};
//! use eventpump_config::PumpConfig;
//!
//! # async fn example() -> eventpump::error::Result<()> {
//! let app = Application::new(PumpConfig::default());
//! let (source, sender) = ChannelSource::new("lines", 128);
//!
//! let pipeline = PipelineBuilder::new("upper")
//!     .source(source)
//!     .processor(MapProcessor::new("upper", |event: Event| {
//!         Ok(Event::from(event.to_string().to_uppercase()))
//!     }))
//!     .sink(PrintSink::new("stdout"))
//!     .build(&app)?;
//!
//! let _source_task = pipeline.start().await?;
//! sender.send((Context::new("lines"), Event::from("hello"))).await.ok();
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod control;
pub mod executor;
pub mod operator;

pub use builder::PipelineBuilder;
pub use control::PipelineControl;
pub use executor::{Pipeline, Stage};
pub use operator::{
    FilterProcessor, FlatMapProcessor, MapProcessor, Outcome, Processor, Sink, Source,
};
