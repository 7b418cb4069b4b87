//! Ratio computation and threshold classification.
//!
//! A pair passes when `round(dev / latest, 1)` stays at or below the
//! threshold. Missing inputs and a zero divisor are reported as a data error,
//! never as an infinite ratio. NaN and infinite quotients from the inputs
//! themselves are kept and compared like any other ratio, so they fail.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::MetricValue;

/// Decimal places kept in a computed ratio
pub const RATIO_DECIMALS: usize = 1;

/// Classification of one computed ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatioStatus {
    #[serde(rename = "satisfactory")]
    Satisfactory,
    #[serde(rename = "unsatisfactory")]
    Unsatisfactory,
    #[serde(rename = "data error")]
    DataError,
    #[serde(rename = "error")]
    Error,
}

impl RatioStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RatioStatus::Satisfactory => "satisfactory",
            RatioStatus::Unsatisfactory => "unsatisfactory",
            RatioStatus::DataError => "data error",
            RatioStatus::Error => "error",
        }
    }
}

impl fmt::Display for RatioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acceptance criteria for a ratio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    /// Largest acceptable ratio (inclusive)
    pub limit: f64,
    /// Also reject ratios that are zero or negative
    pub require_positive: bool,
}

impl Threshold {
    pub fn new(limit: f64) -> Self {
        Threshold {
            limit,
            require_positive: false,
        }
    }

    pub fn requiring_positive(mut self) -> Self {
        self.require_positive = true;
        self
    }

    fn accepts(&self, ratio: f64) -> bool {
        ratio <= self.limit && (!self.require_positive || ratio > 0.0)
    }
}

/// A rounded ratio and its classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatioResult {
    pub ratio: Option<f64>,
    pub status: RatioStatus,
}

impl RatioResult {
    fn invalid(status: RatioStatus) -> Self {
        RatioResult {
            ratio: None,
            status,
        }
    }
}

/// Compute `round(numerator / denominator, 1)` and classify it.
pub fn compute_ratio(
    numerator: MetricValue,
    denominator: MetricValue,
    threshold: Threshold,
) -> RatioResult {
    let (a, b) = match (numerator, denominator) {
        (Some(a), Some(b)) if b != 0.0 => (a, b),
        _ => {
            tracing::warn!(
                ?numerator,
                ?denominator,
                "invalid data for ratio computation: values are missing or zero"
            );
            return RatioResult::invalid(RatioStatus::DataError);
        }
    };

    let Some(ratio) = round_to(a / b, RATIO_DECIMALS) else {
        tracing::error!(numerator = a, denominator = b, "error computing ratio: rounding failed");
        return RatioResult::invalid(RatioStatus::Error);
    };

    let status = if threshold.accepts(ratio) {
        RatioStatus::Satisfactory
    } else {
        RatioStatus::Unsatisfactory
    };
    RatioResult {
        ratio: Some(ratio),
        status,
    }
}

/// Round to `decimals` places, ties to even on the exact binary value.
///
/// Goes through the decimal formatter, which rounds the exact value rather
/// than `value * 10^n`, so `0.35` (really `0.34999...`) becomes `0.3`.
/// NaN and infinities pass through unchanged.
pub fn round_to(value: f64, decimals: usize) -> Option<f64> {
    if !value.is_finite() {
        return Some(value);
    }
    format!("{value:.decimals$}").parse().ok()
}
