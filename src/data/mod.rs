//! Data layer for querying the metrics backend.
//!
//! Handles the Prometheus HTTP API, decoding of instant query results and
//! extraction of the scalar under test.

mod models;
mod prometheus;

pub use models::{InstantSample, MetricQueryPair, MetricValue};
pub use prometheus::{connect, extract_value, QueryError};

/// Anything that can evaluate an instant query.
///
/// Implemented by [`prometheus::PrometheusClient`]; the runner only talks to this trait so
/// it can be driven by an in-memory backend.
pub trait MetricSource {
    fn instant_query(&self, query: &str) -> Result<Vec<InstantSample>, QueryError>;
}
