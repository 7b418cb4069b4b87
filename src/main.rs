//! kepler-regression: energy regression gate for Kepler deployments.
//!
//! Queries Prometheus for the same energy metrics exported by a "dev" and a
//! "latest" deployment and fails when dev draws more than `threshold` times
//! what latest draws.

mod app;
mod cli;
mod config;
mod data;
mod ratio;

use std::process::ExitCode;

use anyhow::Result;
use cli::{Cli, Commands};
use config::RunConfig;
use tracing_subscriber::EnvFilter;

/// Install the process-wide log sink. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,kepler_regression={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<ExitCode> {
    // Parse CLI arguments
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run(args) => {
            let config = RunConfig::from_run_args(&args)?;
            app::run(&config)
        }
        Commands::Pairs(args) => {
            let config = RunConfig::from_run_args(&args.into())?;
            app::list_pairs(&config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
