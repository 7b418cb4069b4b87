//! Run configuration.
//!
//! Values are layered: built-in defaults, then the TOML config file, then
//! command-line flags and environment variables. The merged result is
//! validated once before anything talks to the backend.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cli::RunArgs;
use crate::data::MetricQueryPair;
use crate::ratio::Threshold;

pub const DEFAULT_PROMETHEUS_URL: &str = "http://localhost:9090";
pub const DEFAULT_THRESHOLD: f64 = 1.9;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// What to do when the backend cannot be reached or a query fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log the error and fail the run
    #[default]
    Fail,
    /// Log the error and carry on (connection: stop with success; query: absent value)
    Skip,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid prometheus url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("threshold must be a positive finite number, got {0}")]
    InvalidThreshold(f64),

    #[error("timeout must be at least one second")]
    InvalidTimeout,

    #[error("no metric pairs configured")]
    NoPairs,

    #[error("metric pair `{0}` has an empty query")]
    EmptyQuery(String),

    #[error("metric pair name must not be empty")]
    EmptyPairName,

    #[error("duplicate metric pair name `{0}`")]
    DuplicatePair(String),
}

/// Contents of the TOML config file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub prometheus_url: Option<String>,
    pub bearer_token: Option<String>,
    pub threshold: Option<f64>,
    pub require_positive: Option<bool>,
    pub liveness_check: Option<bool>,
    pub on_connect_failure: Option<FailurePolicy>,
    pub on_query_failure: Option<FailurePolicy>,
    pub fail_on_data_error: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub tls_verify: Option<bool>,
    pub format: Option<OutputFormat>,
    pub pairs: Option<Vec<MetricQueryPair>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file: {path:?}"))
    }
}

/// Fully resolved settings for one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub prometheus_url: String,
    pub bearer_token: Option<String>,
    pub threshold: f64,
    pub require_positive: bool,
    pub liveness_check: bool,
    pub on_connect_failure: FailurePolicy,
    pub on_query_failure: FailurePolicy,
    pub fail_on_data_error: bool,
    pub timeout_secs: u64,
    pub tls_verify: bool,
    pub format: OutputFormat,
    pub pairs: Vec<MetricQueryPair>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            prometheus_url: DEFAULT_PROMETHEUS_URL.to_string(),
            bearer_token: None,
            threshold: DEFAULT_THRESHOLD,
            require_positive: false,
            liveness_check: true,
            on_connect_failure: FailurePolicy::Fail,
            on_query_failure: FailurePolicy::Fail,
            fail_on_data_error: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            tls_verify: false,
            format: OutputFormat::Text,
            pairs: MetricQueryPair::defaults(),
        }
    }
}

impl RunConfig {
    /// Resolve the configuration for the `run` command and validate it.
    pub fn from_run_args(args: &RunArgs) -> Result<Self> {
        let file = match config_file_path(args.config.as_deref()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config file");
                FileConfig::load(&path)?
            }
            None => FileConfig::default(),
        };

        let config = Self::merge(file, args);
        config.validate()?;
        Ok(config)
    }

    /// Layer file values and then command-line values over the defaults
    pub fn merge(file: FileConfig, args: &RunArgs) -> Self {
        let defaults = RunConfig::default();

        RunConfig {
            prometheus_url: args
                .prometheus_url
                .clone()
                .or(file.prometheus_url)
                .unwrap_or(defaults.prometheus_url),
            bearer_token: args
                .bearer_token
                .clone()
                .or(file.bearer_token)
                .filter(|token| !token.trim().is_empty()),
            threshold: args
                .threshold
                .or(file.threshold)
                .unwrap_or(defaults.threshold),
            require_positive: args.require_positive
                || file.require_positive.unwrap_or(defaults.require_positive),
            liveness_check: !args.no_liveness_check
                && file.liveness_check.unwrap_or(defaults.liveness_check),
            on_connect_failure: args
                .on_connect_failure
                .or(file.on_connect_failure)
                .unwrap_or(defaults.on_connect_failure),
            on_query_failure: args
                .on_query_failure
                .or(file.on_query_failure)
                .unwrap_or(defaults.on_query_failure),
            fail_on_data_error: args.fail_on_data_error
                || file.fail_on_data_error.unwrap_or(defaults.fail_on_data_error),
            timeout_secs: args
                .timeout
                .or(file.timeout_secs)
                .unwrap_or(defaults.timeout_secs),
            tls_verify: args.tls_verify || file.tls_verify.unwrap_or(defaults.tls_verify),
            format: args.format.or(file.format).unwrap_or(defaults.format),
            pairs: file.pairs.unwrap_or(defaults.pairs),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.prometheus_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.prometheus_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.prometheus_url.clone(),
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }

        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        if self.pairs.is_empty() {
            return Err(ConfigError::NoPairs);
        }
        let mut seen = HashSet::new();
        for pair in &self.pairs {
            if pair.name.trim().is_empty() {
                return Err(ConfigError::EmptyPairName);
            }
            if pair.dev.trim().is_empty() || pair.latest.trim().is_empty() {
                return Err(ConfigError::EmptyQuery(pair.name.clone()));
            }
            if !seen.insert(pair.name.as_str()) {
                return Err(ConfigError::DuplicatePair(pair.name.clone()));
            }
        }

        Ok(())
    }

    pub fn ratio_threshold(&self) -> Threshold {
        let threshold = Threshold::new(self.threshold);
        if self.require_positive {
            threshold.requiring_positive()
        } else {
            threshold
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Pick the config file: an explicit path (flag or `KEPLER_REGRESSION_CONFIG`)
/// always wins, otherwise the per-user file is used when it exists.
fn config_file_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    dirs::config_dir()
        .map(|dir| dir.join("kepler-regression").join("config.toml"))
        .filter(|path| path.exists())
}
