//! Command-line interface argument parsing for kepler-regression.
//!
//! - `kepler-regression run` compares every configured pair using the defaults
//! - `kepler-regression run --threshold 2.0 --prometheus-url http://prom:9090`
//! - `kepler-regression pairs --config regression.toml`

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::{FailurePolicy, OutputFormat};

/// Energy regression gate comparing "dev" and "latest" Kepler metrics.
///
/// Exits with status 1 as soon as one ratio exceeds the threshold.
#[derive(Parser, Debug)]
#[command(name = "kepler-regression")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Query every metric pair and check the dev/latest ratios
    Run(RunArgs),

    /// Print the configured metric pairs without querying anything
    Pairs(PairsArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// TOML config file with settings and `[[pairs]]`
    #[arg(short, long, env = "KEPLER_REGRESSION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL of the Prometheus server
    /// Defaults to http://localhost:9090
    #[arg(long, env = "PROMETHEUS_URL")]
    pub prometheus_url: Option<String>,

    /// Bearer token sent with every query
    #[arg(long, env = "PROMETHEUS_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,

    /// Largest acceptable dev/latest ratio (default 1.9)
    #[arg(short, long)]
    pub threshold: Option<f64>,

    /// Also reject ratios that are zero or negative
    #[arg(long)]
    pub require_positive: bool,

    /// Skip the `up` query issued right after connecting
    #[arg(long)]
    pub no_liveness_check: bool,

    /// What to do when the backend is unreachable
    #[arg(long, value_enum)]
    pub on_connect_failure: Option<FailurePolicy>,

    /// What to do when a single query fails
    #[arg(long, value_enum)]
    pub on_query_failure: Option<FailurePolicy>,

    /// Treat pairs whose ratio cannot be computed as failures
    #[arg(long)]
    pub fail_on_data_error: bool,

    /// HTTP timeout in seconds for each query
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Verify the server's TLS certificate
    #[arg(long)]
    pub tls_verify: bool,

    /// Summary format written to stdout
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Args, Debug, Default, Clone)]
pub struct PairsArgs {
    /// TOML config file with `[[pairs]]`
    #[arg(short, long, env = "KEPLER_REGRESSION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,
}

impl From<PairsArgs> for RunArgs {
    fn from(args: PairsArgs) -> Self {
        RunArgs {
            config: args.config,
            format: args.format,
            ..RunArgs::default()
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
