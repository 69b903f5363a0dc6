//! `count`: JSON lines from files counted into time buckets

use async_trait::async_trait;
use clap::Args;
use eventpump::common::{JsonBytesToRecord, NullSink};
use eventpump::connector::{FileLineSource, FileSourceConfig};
use eventpump::{
    Analyzer, AnalyzerProcessor, Application, CountEvaluator, ExitStatus, JsonFieldTime,
    MatrixConfig, Module, PipelineBuilder, PumpService, TimeWindowAnalyzer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const PIPELINE_ID: &str = "count";

#[derive(Args, Debug, Clone)]
pub struct CountCommand {
    /// Directory to scan, or a single file
    #[arg(long, short = 'p', value_name = "PATH")]
    pub path: PathBuf,

    /// Column width in seconds
    #[arg(long, default_value_t = 60.0)]
    pub resolution: f64,

    /// Number of columns kept in the window
    #[arg(long, default_value_t = 15)]
    pub columns: usize,

    /// Record field holding the event time (seconds or RFC 3339)
    #[arg(long, default_value = "ts")]
    pub field: String,

    /// Record field used as the row key; all events share one row when absent
    #[arg(long)]
    pub key_field: Option<String>,

    /// What to do with a file once read: delete, stop or move
    ///
    /// `stop` ends the run after the first file.
    #[arg(long, default_value = "stop")]
    pub post: String,
}

type CountAnalyzer = TimeWindowAnalyzer<CountEvaluator<f64>>;

impl CountCommand {
    pub async fn execute(&self, app: Arc<Application>) -> anyhow::Result<ExitStatus> {
        let service = PumpService::install(&app)?;

        let mut evaluator = CountEvaluator::new(JsonFieldTime::new(self.field.as_str()));
        if let Some(key_field) = &self.key_field {
            evaluator = evaluator.with_key_field(key_field.as_str());
        }

        let matrix_config = MatrixConfig::new(self.columns, self.resolution);
        let analyzer = Arc::new(CountAnalyzer::new("counter", evaluator, &matrix_config)?);
        service.add_matrix("counterMatrix", Arc::clone(analyzer.matrix()))?;

        let source = FileLineSource::new(
            &app,
            "files",
            FileSourceConfig {
                path: self.path.clone(),
                post: self.post.clone(),
            },
        );

        let pipeline = PipelineBuilder::new(PIPELINE_ID)
            .source(source)
            .processor(JsonBytesToRecord::new("decode"))
            .processor(AnalyzerProcessor::new(Arc::clone(&analyzer)))
            .sink(NullSink::new("discard"))
            .build(&app)?;

        service.add_pipeline(pipeline)?;
        app.add_module(Report { analyzer });

        app.initialize().await?;
        Ok(app.run().await?)
    }
}

/// Prints the window as JSON once the pipelines are stopped
struct Report {
    analyzer: Arc<CountAnalyzer>,
}

#[async_trait]
impl Module for Report {
    fn name(&self) -> &str {
        "report"
    }

    async fn finalize(&self, _app: &Application) -> anyhow::Result<()> {
        let snapshot = self.analyzer.analyze();
        info!(
            total = snapshot.total(),
            skipped = snapshot.skipped,
            populated = snapshot.populated_columns,
            "Window summary"
        );
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        Ok(())
    }
}
