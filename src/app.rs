//! Regression runner: connect, query every pair, compare, report.

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{FailurePolicy, OutputFormat, RunConfig};
use crate::data::{self, extract_value, MetricQueryPair, MetricSource, MetricValue, QueryError};
use crate::ratio::{compute_ratio, RatioResult, RatioStatus};

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Every evaluable pair stayed within the threshold
    Passed,
    /// A ratio went over the threshold; later pairs were not evaluated
    Regressed { pair: String, ratio: f64 },
    /// A ratio could not be computed and data errors are fatal
    InvalidData { pair: String, status: RatioStatus },
    /// Connection or query failure under the `fail` policy
    Aborted { reason: String },
    /// Connection failure under the `skip` policy
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Passed | Outcome::Skipped { .. })
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Regressed { .. } => "regressed",
            Outcome::InvalidData { .. } => "invalid data",
            Outcome::Aborted { .. } => "aborted",
            Outcome::Skipped { .. } => "skipped",
        }
    }
}

/// Result of one evaluated pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairReport {
    pub name: String,
    pub dev_query: String,
    pub latest_query: String,
    pub dev: MetricValue,
    pub latest: MetricValue,
    pub ratio: Option<f64>,
    pub status: RatioStatus,
}

impl PairReport {
    fn new(pair: &MetricQueryPair, dev: MetricValue, latest: MetricValue, result: RatioResult) -> Self {
        PairReport {
            name: pair.name.clone(),
            dev_query: pair.dev.clone(),
            latest_query: pair.latest.clone(),
            dev,
            latest,
            ratio: result.ratio,
            status: result.status,
        }
    }
}

/// Summary of a whole run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub outcome: Outcome,
    pub threshold: f64,
    pub require_positive: bool,
    pub pairs: Vec<PairReport>,
    pub generated_at: DateTime<Utc>,
}

impl RunReport {
    fn new(config: &RunConfig, outcome: Outcome, pairs: Vec<PairReport>) -> Self {
        RunReport {
            outcome,
            threshold: config.threshold,
            require_positive: config.require_positive,
            pairs,
            generated_at: Utc::now(),
        }
    }
}

/// Evaluates the configured pairs against one metric source
pub struct Runner<'a, S: MetricSource> {
    source: &'a S,
    config: &'a RunConfig,
}

impl<'a, S: MetricSource> Runner<'a, S> {
    pub fn new(source: &'a S, config: &'a RunConfig) -> Self {
        Runner { source, config }
    }

    /// Retrieve the current value of `query`.
    ///
    /// `Err` only escapes under the `fail` query policy; with `skip` the error
    /// is logged and the value is reported as absent.
    pub fn get_metric_value(&self, query: &str) -> Result<MetricValue, QueryError> {
        tracing::info!(query, "retrieving metric");
        match self.source.instant_query(query) {
            Ok(result) => {
                tracing::info!(query, ?result, "data retrieved for metric");
                if let Some(ts) = result.first().and_then(|sample| sample.timestamp()) {
                    tracing::debug!(query, evaluated_at = %ts.to_rfc3339(), "sample timestamp");
                }
                Ok(extract_value(&result))
            }
            Err(err) => {
                tracing::error!(query, error = %err, "failed to retrieve data for metric");
                match self.config.on_query_failure {
                    FailurePolicy::Fail => Err(err),
                    FailurePolicy::Skip => Ok(None),
                }
            }
        }
    }

    /// Evaluate every pair in order, stopping at the first failing one.
    pub fn run_all(&self) -> RunReport {
        let threshold = self.config.ratio_threshold();
        let mut reports = Vec::with_capacity(self.config.pairs.len());

        for pair in &self.config.pairs {
            let span = tracing::info_span!("pair", name = %pair.name);
            let _enter = span.enter();

            let values = self
                .get_metric_value(&pair.dev)
                .and_then(|dev| Ok((dev, self.get_metric_value(&pair.latest)?)));
            let (dev, latest) = match values {
                Ok(values) => values,
                Err(err) => {
                    let outcome = Outcome::Aborted {
                        reason: format!("query for pair `{}` failed: {err}", pair.name),
                    };
                    return RunReport::new(self.config, outcome, reports);
                }
            };

            let result = compute_ratio(dev, latest, threshold);
            reports.push(PairReport::new(pair, dev, latest, result));

            match (result.status, result.ratio) {
                (RatioStatus::Unsatisfactory, Some(ratio)) => {
                    tracing::error!(
                        ratio,
                        threshold = self.config.threshold,
                        "unsatisfactory ratio computed: {ratio} exceeds the threshold {}",
                        self.config.threshold
                    );
                    let outcome = Outcome::Regressed {
                        pair: pair.name.clone(),
                        ratio,
                    };
                    return RunReport::new(self.config, outcome, reports);
                }
                (_, Some(ratio)) => {
                    tracing::info!(ratio, "ratio of {} to {}: {ratio}", pair.dev, pair.latest);
                }
                (status, None) => {
                    tracing::info!(%status, "ratio could not be calculated due to missing or invalid data");
                    if self.config.fail_on_data_error {
                        let outcome = Outcome::InvalidData {
                            pair: pair.name.clone(),
                            status,
                        };
                        return RunReport::new(self.config, outcome, reports);
                    }
                }
            }
        }

        RunReport::new(self.config, Outcome::Passed, reports)
    }
}

/// Map a connection failure onto an outcome according to the policy
fn connection_failure(policy: FailurePolicy, err: &QueryError) -> Outcome {
    tracing::error!(error = %err, "failed to connect to prometheus server");
    let reason = format!("failed to connect to prometheus server: {err}");
    match policy {
        FailurePolicy::Fail => Outcome::Aborted { reason },
        FailurePolicy::Skip => {
            tracing::warn!("skipping regression checks because the backend is unavailable");
            Outcome::Skipped { reason }
        }
    }
}

/// Connect to the configured backend, evaluate every pair, print the summary
/// and return the process exit code.
pub fn run(config: &RunConfig) -> Result<ExitCode> {
    let report = execute(config, &mut io::stdout().lock())?;
    Ok(report.outcome.exit_code())
}

/// Full run against the configured backend, writing the summary to `out`
fn execute(config: &RunConfig, out: &mut impl Write) -> Result<RunReport> {
    tracing::info!(
        url = %config.prometheus_url,
        threshold = config.threshold,
        pairs = config.pairs.len(),
        "starting regression run"
    );

    let report = match data::connect(config) {
        Ok(client) => {
            tracing::info!("connection to prometheus server successful");
            Runner::new(&client, config).run_all()
        }
        Err(err) => {
            let outcome = connection_failure(config.on_connect_failure, &err);
            RunReport::new(config, outcome, Vec::new())
        }
    };

    write_report(out, &report, config.format)?;
    tracing::info!(outcome = report.outcome.label(), "regression run finished");
    Ok(report)
}

/// Print the configured pairs
pub fn list_pairs(config: &RunConfig) -> Result<()> {
    write_pairs(&mut io::stdout().lock(), &config.pairs, config.format)
}

fn write_pairs(out: &mut impl Write, pairs: &[MetricQueryPair], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, pairs).context("Failed to serialize pairs")?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            for pair in pairs {
                writeln!(out, "{}\n  dev:    {}\n  latest: {}", pair.name, pair.dev, pair.latest)?;
            }
        }
    }
    Ok(())
}

fn write_report(out: &mut impl Write, report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, report).context("Failed to serialize report")?;
            writeln!(out)?;
        }
        OutputFormat::Text => out.write_all(render_text(report).as_bytes())?,
    }
    Ok(())
}

fn format_value(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

/// Plain-text summary table
pub fn render_text(report: &RunReport) -> String {
    let width = report
        .pairs
        .iter()
        .map(|p| p.name.len())
        .max()
        .unwrap_or(0)
        .max("PAIR".len());

    let mut out = String::new();
    if !report.pairs.is_empty() {
        out.push_str(&format!(
            "{:<width$}  {:>12}  {:>12}  {:>6}  STATUS\n",
            "PAIR", "DEV", "LATEST", "RATIO"
        ));
        for pair in &report.pairs {
            out.push_str(&format!(
                "{:<width$}  {:>12}  {:>12}  {:>6}  {}\n",
                pair.name,
                format_value(pair.dev, 3),
                format_value(pair.latest, 3),
                format_value(pair.ratio, 1),
                pair.status
            ));
        }
    }

    let summary = match &report.outcome {
        Outcome::Passed => format!("result: passed (threshold {})", report.threshold),
        Outcome::Regressed { pair, ratio } => format!(
            "result: regressed, `{pair}` ratio {ratio} exceeds threshold {}",
            report.threshold
        ),
        Outcome::InvalidData { pair, status } => {
            format!("result: invalid data, `{pair}` reported {status}")
        }
        Outcome::Aborted { reason } => format!("result: aborted, {reason}"),
        Outcome::Skipped { reason } => format!("result: skipped, {reason}"),
    };
    out.push_str(&summary);
    out.push('\n');
    out
}
