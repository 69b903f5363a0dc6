//! Command-line runner for eventpump pipelines
//!
//! ```text
//! pump [-c FILE] [-v] echo --address 0.0.0.0:8083
//! pump [-c FILE] [-v] count --path /var/spool/events --resolution 60
//! ```

mod commands;

use clap::{Parser, Subcommand};
use commands::{CountCommand, EchoCommand};
use eventpump::{Application, ExitStatus};
use eventpump_config::PumpConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pump")]
#[command(about = "Run eventpump pipelines", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Line-oriented TCP echo server
    #[command(name = "echo", about = "Echo every received line back to its peer")]
    Echo(EchoCommand),

    /// Count JSON records read from files into time buckets
    #[command(name = "count", about = "Count file records per time bucket")]
    Count(CountCommand),
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(status) => std::process::exit(status.code()),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<ExitStatus> {
    let cli = Cli::parse();

    let mut config = PumpConfig::load(cli.config)?;
    if cli.verbose {
        config.general_mut().verbose = true;
    }

    init_tracing(config.general().verbose);

    let app = Application::new(config);
    match cli.command {
        Commands::Echo(command) => command.execute(app).await,
        Commands::Count(command) => command.execute(app).await,
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("eventpump=debug,pump=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
