//! Data models for the Prometheus query results and the metric pairs under test.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Scalar extracted from a query response. `None` when the backend returned
/// nothing usable.
pub type MetricValue = Option<f64>;

/// Kepler node energy counters compared by the default pair list
const DEFAULT_ENERGY_COUNTERS: [&str; 5] = ["platform", "core", "dram", "package", "uncore"];

/// The same metric expressed against the "dev" and the "latest" deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQueryPair {
    pub name: String,
    pub dev: String,
    pub latest: String,
}

impl MetricQueryPair {
    pub fn new(name: impl Into<String>, dev: impl Into<String>, latest: impl Into<String>) -> Self {
        MetricQueryPair {
            name: name.into(),
            dev: dev.into(),
            latest: latest.into(),
        }
    }

    /// Pair comparing the per-second rate of a Kepler node joules counter
    pub fn kepler_node_energy(counter: &str) -> Self {
        let query = |job: &str| {
            format!("sum(rate(kepler_node_{counter}_joules_total{{job=\"{job}\"}}[1m]))")
        };
        MetricQueryPair::new(counter, query("dev"), query("latest"))
    }

    /// The built-in pair list used when no config file provides one
    pub fn defaults() -> Vec<Self> {
        DEFAULT_ENERGY_COUNTERS
            .iter()
            .map(|counter| Self::kepler_node_energy(counter))
            .collect()
    }
}

/// One element of an instant-vector query result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstantSample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    /// `[unix_timestamp, "value"]` as sent by Prometheus. Kept loose so that
    /// malformed payloads degrade to an absent value instead of a decode error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<serde_json::Value>>,
}

impl InstantSample {
    #[cfg(test)]
    pub fn new(timestamp: f64, value: &str) -> Self {
        InstantSample {
            metric: BTreeMap::new(),
            value: Some(vec![serde_json::json!(timestamp), serde_json::json!(value)]),
        }
    }

    /// Evaluation time of the sample, if present and representable
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let secs = self.value.as_ref()?.first()?.as_f64()?;
        let millis = (secs * 1000.0).round();
        if !millis.is_finite() {
            return None;
        }
        Utc.timestamp_millis_opt(millis as i64).single()
    }
}
