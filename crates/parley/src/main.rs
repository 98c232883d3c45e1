//! Parley - chat gateway between clients and a generation backend
//!
//! Main entry point for the Parley CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod client;
mod commands;

use commands::{start, status};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Parley - chat gateway between clients and a generation backend
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Server URL (default: http://localhost:8080)
    #[arg(long, global = true, env = "PARLEY_SERVER_URL")]
    pub server: Option<String>,

    /// Directory for rolling JSON logs (overrides config)
    #[arg(long, global = true, env = "PARLEY_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Parley gateway
    Start(start::StartArgs),

    /// Show gateway and backend status
    Status(status::StatusArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "parley=debug,parley_server=debug,parley_upstream=debug,parley_store=debug,parley_cache=debug,parley_config=debug,info"
    } else {
        "parley=info,parley_server=info,parley_upstream=info,warn"
    };

    let log_dir = resolve_log_dir(&cli);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "parley.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "parley=trace,parley_server=trace,parley_upstream=trace,parley_store=debug,parley_cache=debug,info",
                )),
        )
        .init();

    let server_url = cli
        .server
        .unwrap_or_else(|| "http://localhost:8080".to_string());

    let ctx = commands::Context {
        server_url,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Start(args) => start::run(args, &ctx).await,
        Commands::Status(args) => status::run(args, &ctx).await,
    }
}

/// `--log-dir`, else `[logging] dir` from the config the command would load,
/// else the default under the config directory.
fn resolve_log_dir(cli: &Cli) -> PathBuf {
    if let Some(ref dir) = cli.log_dir {
        return dir.clone();
    }

    let loaded = match &cli.command {
        Commands::Start(args) => match args.config {
            Some(ref path) => parley_config::load_single(path).ok(),
            None => parley_config::load_config(None).ok(),
        },
        Commands::Status(_) => None,
    };

    loaded
        .and_then(|l| l.config.logging().dir)
        .unwrap_or_else(parley_config::default_log_dir)
}
