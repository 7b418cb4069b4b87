//! Blocking client for the Prometheus HTTP API.
//!
//! Only instant queries are needed:
//! - `GET {base}/api/v1/query?query=<expr>`
//! - success envelope: `{"status":"success","data":{"resultType":"vector","result":[...]}}`
//! - error envelope: `{"status":"error","errorType":"bad_data","error":"..."}`

use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use super::models::{InstantSample, MetricValue};
use super::MetricSource;
use crate::config::RunConfig;

/// Query used to check that the backend is up and scraping
const LIVENESS_QUERY: &str = "up";

/// Longest slice of a response body kept in an error message
const ERROR_BODY_MAX_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("prometheus returned HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("prometheus rejected the query ({error_type}): {message}")]
    Api { error_type: String, message: String },

    #[error("failed to decode prometheus response: {0}")]
    Decode(String),

    #[error("invalid bearer token")]
    InvalidToken,

    #[error("liveness query `up` returned no data")]
    EmptyLiveness,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: serde_json::Value,
}

impl QueryData {
    /// Normalise the result into a list of samples.
    ///
    /// Scalar and string results come back as a bare `[ts, "v"]` pair and are
    /// wrapped into a single sample. Matrix results carry `values` rather than
    /// `value`, so their samples decode with an absent value.
    fn into_samples(self) -> Result<Vec<InstantSample>, QueryError> {
        match self.result_type.as_str() {
            "scalar" | "string" => {
                let pair: Vec<serde_json::Value> = serde_json::from_value(self.result)
                    .map_err(|e| QueryError::Decode(e.to_string()))?;
                Ok(vec![InstantSample {
                    value: Some(pair),
                    ..InstantSample::default()
                }])
            }
            _ => serde_json::from_value(self.result).map_err(|e| QueryError::Decode(e.to_string())),
        }
    }
}

/// Session against a Prometheus server
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    query_url: String,
    http: HttpClient,
}

impl PrometheusClient {
    /// Build a client for `base_url`. No request is made.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        bearer_token: Option<&str>,
        tls_verify: bool,
    ) -> Result<Self, QueryError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = bearer_token {
            let mut auth_value = header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| QueryError::InvalidToken)?;
            auth_value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, auth_value);
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(!tls_verify)
            .build()
            .map_err(QueryError::Client)?;

        Ok(PrometheusClient {
            query_url: format!("{}/api/v1/query", base_url.trim_end_matches('/')),
            http,
        })
    }

    /// Run the liveness query; an empty answer counts as a dead backend.
    pub fn check_liveness(&self) -> Result<(), QueryError> {
        let samples = self.instant_query(LIVENESS_QUERY)?;
        if samples.is_empty() {
            return Err(QueryError::EmptyLiveness);
        }
        tracing::debug!(targets = samples.len(), "liveness query answered");
        Ok(())
    }
}

impl MetricSource for PrometheusClient {
    fn instant_query(&self, query: &str) -> Result<Vec<InstantSample>, QueryError> {
        let response = self
            .http
            .get(&self.query_url)
            .query(&[("query", query)])
            .send()
            .map_err(|source| QueryError::Connect {
                url: self.query_url.clone(),
                source,
            })?;

        let status = response.status();
        let body = response.text().map_err(|source| QueryError::Connect {
            url: self.query_url.clone(),
            source,
        })?;

        // Prometheus sends its error envelope with 4xx/5xx codes, so try the
        // envelope before falling back to the bare HTTP status.
        let envelope: ApiResponse = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(QueryError::Http {
                    status,
                    body: truncate(&body, ERROR_BODY_MAX_LEN),
                })
            }
            Err(e) => return Err(QueryError::Decode(e.to_string())),
        };

        if envelope.status != "success" {
            return Err(QueryError::Api {
                error_type: envelope.error_type.unwrap_or_else(|| "unknown".to_string()),
                message: envelope.error.unwrap_or_default(),
            });
        }

        match envelope.data {
            Some(data) => data.into_samples(),
            None => Err(QueryError::Decode("missing `data` field".to_string())),
        }
    }
}

/// Build a client from the run configuration and, when enabled, verify that
/// the backend answers the liveness query.
pub fn connect(config: &RunConfig) -> Result<PrometheusClient, QueryError> {
    let client = PrometheusClient::new(
        &config.prometheus_url,
        config.timeout(),
        config.bearer_token.as_deref(),
        config.tls_verify,
    )?;
    if config.liveness_check {
        client.check_liveness()?;
    }
    Ok(client)
}

/// Extract the current scalar from an instant query result.
///
/// Only the first sample is considered. Returns `None` when the result is
/// empty, the sample has no `value`, or the value is not numeric.
pub fn extract_value(result: &[InstantSample]) -> MetricValue {
    let value = result.first()?.value.as_ref()?;
    let raw = match value.get(1) {
        Some(raw) => raw,
        None => {
            tracing::error!(?value, "sample value has no scalar component");
            return None;
        }
    };

    let parsed = match raw {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    };
    if parsed.is_none() {
        tracing::error!(%raw, "error converting result to float");
    }
    parsed
}

fn truncate(body: &str, max_len: usize) -> String {
    match body.char_indices().nth(max_len) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, MockServer};
    use std::net::TcpListener;

    fn vector_body(value: &str) -> String {
        format!(
            r#"{{"status":"success","data":{{"resultType":"vector","result":[{{"metric":{{}},"value":[1700000000.123,"{value}"]}}]}}}}"#
        )
    }

    fn client(url: &str) -> PrometheusClient {
        PrometheusClient::new(url, Duration::from_secs(5), None, false).unwrap()
    }

    fn sample_with(value: serde_json::Value) -> InstantSample {
        InstantSample {
            value: Some(value.as_array().cloned().unwrap()),
            ..InstantSample::default()
        }
    }

    #[test]
    fn test_extract_value_empty() {
        assert_eq!(extract_value(&[]), None);
    }

    #[test]
    fn test_extract_value_non_numeric() {
        assert_eq!(extract_value(&[InstantSample::new(0.0, "abc")]), None);
    }

    #[test]
    fn test_extract_value_numeric_string() {
        assert_eq!(extract_value(&[InstantSample::new(0.0, "3.5")]), Some(3.5));
    }

    #[test]
    fn test_extract_value_missing_value_field() {
        assert_eq!(extract_value(&[InstantSample::default()]), None);
    }

    #[test]
    fn test_extract_value_malformed_pairs() {
        assert_eq!(extract_value(&[sample_with(serde_json::json!([0]))]), None);
        assert_eq!(extract_value(&[sample_with(serde_json::json!([0, null]))]), None);
        assert_eq!(
            extract_value(&[sample_with(serde_json::json!([0, 2.25]))]),
            Some(2.25)
        );
    }

    #[test]
    fn test_extract_value_uses_first_sample_only() {
        let result = vec![InstantSample::new(0.0, "1.5"), InstantSample::new(0.0, "9")];
        assert_eq!(extract_value(&result), Some(1.5));
    }

    #[test]
    fn test_extract_value_prometheus_special_values() {
        assert!(extract_value(&[InstantSample::new(0.0, "NaN")]).unwrap().is_nan());
        assert_eq!(
            extract_value(&[InstantSample::new(0.0, "+Inf")]),
            Some(f64::INFINITY)
        );
    }

    #[test]
    fn test_instant_query_vector() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/query")
                .query_param("query", "up");
            then.status(200)
                .header("content-type", "application/json")
                .body(vector_body("42.5"));
        });

        let samples = client(&server.base_url()).instant_query("up").unwrap();
        assert_eq!(extract_value(&samples), Some(42.5));
        mock.assert();
    }

    #[test]
    fn test_instant_query_sends_promql_verbatim() {
        let query = r#"sum(rate(kepler_node_core_joules_total{job="dev"}[1m]))"#;
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/query")
                .query_param("query", query);
            then.status(200).body(vector_body("1"));
        });

        // Trailing slash on the base URL must not double up in the path
        client(&format!("{}/", server.base_url()))
            .instant_query(query)
            .unwrap();
        mock.assert();
    }

    #[test]
    fn test_instant_query_sends_bearer_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.path("/api/v1/query")
                .header("authorization", "Bearer s3cret");
            then.status(200).body(vector_body("1"));
        });

        let client =
            PrometheusClient::new(&server.base_url(), Duration::from_secs(5), Some("s3cret"), false)
                .unwrap();
        client.instant_query("up").unwrap();
        mock.assert();
    }

    #[test]
    fn test_instant_query_scalar_result() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/api/v1/query");
            then.status(200).body(
                r#"{"status":"success","data":{"resultType":"scalar","result":[1700000000,"7"]}}"#,
            );
        });

        let samples = client(&server.base_url()).instant_query("scalar(1)").unwrap();
        assert_eq!(extract_value(&samples), Some(7.0));
    }

    #[test]
    fn test_instant_query_api_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/api/v1/query");
            then.status(400)
                .body(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#);
        });

        let err = client(&server.base_url()).instant_query("sum(").unwrap_err();
        match err {
            QueryError::Api {
                error_type,
                message,
            } => {
                assert_eq!(error_type, "bad_data");
                assert_eq!(message, "parse error");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_instant_query_http_error_without_envelope() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/api/v1/query");
            then.status(502).body("upstream down");
        });

        let err = client(&server.base_url()).instant_query("up").unwrap_err();
        assert!(matches!(err, QueryError::Http { status, .. } if status == StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn test_instant_query_undecodable_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/api/v1/query");
            then.status(200).body("not json");
        });

        let err = client(&server.base_url()).instant_query("up").unwrap_err();
        assert!(matches!(err, QueryError::Decode(_)));
    }

    #[test]
    fn test_instant_query_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}")).instant_query("up").unwrap_err();
        assert!(matches!(err, QueryError::Connect { .. }));
    }

    #[test]
    fn test_liveness_requires_data() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.query_param("query", "up");
            then.status(200)
                .body(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#);
        });

        let err = client(&server.base_url()).check_liveness().unwrap_err();
        assert!(matches!(err, QueryError::EmptyLiveness));
    }

    #[test]
    fn test_connect_runs_liveness_check() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.query_param("query", "up");
            then.status(200).body(vector_body("1"));
        });

        let config = RunConfig {
            prometheus_url: server.base_url(),
            ..RunConfig::default()
        };
        connect(&config).unwrap();
        mock.assert_hits(1);
    }

    #[test]
    fn test_connect_without_liveness_check_makes_no_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.query_param("query", "up");
            then.status(200).body(vector_body("1"));
        });

        let config = RunConfig {
            prometheus_url: server.base_url(),
            liveness_check: false,
            ..RunConfig::default()
        };
        assert!(connect(&config).is_ok());
        mock.assert_hits(0);
    }

    #[test]
    fn test_invalid_token_rejected() {
        let err = PrometheusClient::new("http://localhost:9090", Duration::from_secs(1), Some("bad\ntoken"), false)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidToken));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
