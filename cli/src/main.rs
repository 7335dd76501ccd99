//! CLI for perfstream
//!
//! Commands:
//! - analyze: Parse a recording and print its hotspots
//! - dump: Print the raw events of a perfparser stream

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "perfstream")]
#[command(about = "perfstream - perf recording analyzer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a recording, optionally filter it and report the hottest code
    Analyze(commands::analyze::AnalyzeArgs),

    /// Print one line per event of a .perfparser stream
    Dump(commands::dump::DumpArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze(args) => {
            init_tracing(args.verbose);
            commands::analyze::run(args).await
        }
        Commands::Dump(args) => {
            init_tracing(args.verbose);
            commands::dump::run(args).await
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
