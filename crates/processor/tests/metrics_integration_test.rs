//! Prometheus exposition of pipeline counters

use eventpump::application::Application;
use eventpump::common::NullSink;
use eventpump::connector::ChannelSource;
use eventpump::core::{Context, Event};
use eventpump::pipeline::{FilterProcessor, PipelineBuilder};
use eventpump_config::PumpConfig;

#[tokio::test]
async fn pipeline_counters_are_encoded() {
    let app = Application::builder(PumpConfig::default())
        .handle_signals(false)
        .build();

    let (source, _sender) = ChannelSource::new("in", 4);
    let pipeline = PipelineBuilder::new("metered")
        .source(source)
        .processor(FilterProcessor::new("odd", |_ctx: &Context, event: &Event| {
            event.len() % 2 == 1
        }))
        .sink(NullSink::new("null"))
        .build(&app)
        .unwrap();
    let _task = pipeline.start().await.unwrap();

    for input in ["a", "bb", "ccc"] {
        pipeline
            .process(Context::new("test"), Event::from(input))
            .await
            .unwrap();
    }

    let text = app.metrics().encode().unwrap();
    assert!(text.contains("eventpump_pipeline_events_in_total{pipeline=\"metered\"} 3"));
    assert!(text.contains("eventpump_pipeline_events_out_total{pipeline=\"metered\"} 2"));
    assert!(text.contains("eventpump_pipeline_events_dropped_total{pipeline=\"metered\"} 1"));
}
