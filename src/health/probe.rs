use super::classifier::{HealthScope, ProbeSignals};
use crate::collector::components::collector_duration;
use crate::workload::workload_name;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

/// What a probe is asked about: one scope and the exporters serving it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeTarget {
    pub scope: HealthScope,
    pub exporters: Vec<String>,
}

impl ProbeTarget {
    pub fn new(scope: HealthScope, exporters: Vec<String>) -> Self {
        Self { scope, exporters }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("query `{query}` failed: {message}")]
    Query { query: String, message: String },
    #[error("invalid sample value `{0}`")]
    InvalidValue(String),
}

/// Source of health signals. A failing probe means the scope is unreachable.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> Result<ProbeSignals, ProbeError>;
}

/// Probe returning fixed signals, settable per scope. Used in standalone
/// mode without a metrics backend and in tests.
#[derive(Clone, Debug, Default)]
pub struct StaticProbe {
    fallback: ProbeSignals,
    overrides: Arc<RwLock<BTreeMap<HealthScope, ProbeSignals>>>,
}

impl StaticProbe {
    pub fn new(fallback: ProbeSignals) -> Self {
        Self {
            fallback,
            overrides: Arc::default(),
        }
    }

    pub fn set(&self, scope: HealthScope, signals: ProbeSignals) {
        self.overrides
            .write()
            .expect("static probe lock poisoned")
            .insert(scope, signals);
    }

    pub fn clear(&self, scope: &HealthScope) {
        self.overrides
            .write()
            .expect("static probe lock poisoned")
            .remove(scope);
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn probe(&self, target: &ProbeTarget) -> Result<ProbeSignals, ProbeError> {
        let overrides = self.overrides.read().expect("static probe lock poisoned");
        Ok(overrides
            .get(&target.scope)
            .or_else(|| overrides.get(&HealthScope::aggregate(target.scope.kind)))
            .copied()
            .unwrap_or(self.fallback))
    }
}

/// Reads collector self-metrics from a Prometheus-compatible query API.
#[derive(Clone, Debug)]
pub struct PrometheusProbe {
    client: reqwest::Client,
    base_url: String,
    rate_window: Duration,
}

impl PrometheusProbe {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        rate_window: Duration,
    ) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_window,
        })
    }

    async fn query(&self, query: &str) -> Result<Option<f64>, ProbeError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[("query", query)])
            .send()
            .await?
            .error_for_status()?;
        let body: QueryResponse = response.json().await?;
        body.scalar(query)
    }
}

#[async_trait]
impl HealthProbe for PrometheusProbe {
    async fn probe(&self, target: &ProbeTarget) -> Result<ProbeSignals, ProbeError> {
        let queries = HealthQueries::new(target, self.rate_window);
        Ok(ProbeSignals {
            reachable: true,
            buffer_fill_ratio: self.query(&queries.buffer_fill).await?,
            export_error_rate: self.query(&queries.export_errors).await?,
            queue_saturation: self.query(&queries.saturation).await?,
        })
    }
}

/// PromQL expressions for one probe target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthQueries {
    pub buffer_fill: String,
    pub export_errors: String,
    pub saturation: String,
}

impl HealthQueries {
    pub fn new(target: &ProbeTarget, rate_window: Duration) -> Self {
        let kind = target.scope.kind;
        let unit = kind.signal_unit();
        let window = collector_duration(rate_window);
        let job = format!("job=\"{}\"", workload_name(kind));
        let exporters = if target.exporters.is_empty() {
            job.clone()
        } else {
            format!("{job},exporter=~\"{}\"", target.exporters.join("|"))
        };

        Self {
            buffer_fill: format!(
                "max(otelcol_exporter_queue_size{{{exporters}}} / otelcol_exporter_queue_capacity{{{exporters}}})"
            ),
            export_errors: ratio(
                &format!("otelcol_exporter_send_failed_{unit}{{{exporters}}}"),
                &format!("otelcol_exporter_sent_{unit}{{{exporters}}}"),
                &window,
            ),
            saturation: ratio(
                &format!("otelcol_receiver_refused_{unit}{{{job}}}"),
                &format!("otelcol_receiver_accepted_{unit}{{{job}}}"),
                &window,
            ),
        }
    }
}

fn ratio(failed: &str, succeeded: &str, window: &str) -> String {
    format!(
        "sum(rate({failed}[{window}])) / (sum(rate({succeeded}[{window}])) + sum(rate({failed}[{window}])))"
    )
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<QuerySample>,
}

#[derive(Debug, Deserialize)]
struct QuerySample {
    value: (f64, String),
}

impl QueryResponse {
    /// First sample of an instant-vector result; empty or non-finite means
    /// no signal.
    fn scalar(self, query: &str) -> Result<Option<f64>, ProbeError> {
        if self.status != "success" {
            return Err(ProbeError::Query {
                query: query.to_string(),
                message: self.error.unwrap_or_else(|| self.status.clone()),
            });
        }
        let Some(sample) = self.data.and_then(|data| data.result.into_iter().next()) else {
            return Ok(None);
        };
        let raw = sample.value.1;
        let value: f64 = raw
            .parse()
            .map_err(|_| ProbeError::InvalidValue(raw.clone()))?;
        Ok(value.is_finite().then_some(value))
    }
}
