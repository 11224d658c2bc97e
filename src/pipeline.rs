//! Typed pipeline resources.
//!
//! A pipeline is one of three closed variants (logs, metrics, traces). Each
//! variant carries its own input selection and shares the output and
//! lifecycle model. Everything in this module is plain data; behaviour lives in
//! the synthesizer and the reconcile loop.

pub mod log;
pub mod metric;
pub mod output;
pub mod selector;
pub mod status;
pub mod trace;
pub mod validation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use log::{ApplicationLogInput, LogInput, LogPipelineSpec};
pub use metric::{
    IstioInput, MetricInput, MetricPipelineSpec, OtlpInput, PrometheusInput, RuntimeInput,
    RuntimeResources,
};
pub use output::{BasicAuth, OtlpOutput, OtlpProtocol, PipelineOutput, TlsSettings};
pub use selector::{ContainerSelector, NameSelector, NamespaceSelector};
pub use status::{
    AggregateState, AggregateStatus, Condition, ConditionStatus, ConfigurationReason,
    PipelineStatus,
};
pub use trace::TracePipelineSpec;
pub use validation::{validate, ValidationError};

/// Finalizer placed on every active pipeline until its removal has been
/// reflected in the deployed collector.
pub const PIPELINE_FINALIZER: &str = "telemetry.kyma-project.io/finalizer";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    Logs,
    Metrics,
    Traces,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 3] = [Self::Logs, Self::Metrics, Self::Traces];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Logs => "logs",
            Self::Metrics => "metrics",
            Self::Traces => "traces",
        }
    }

    /// Resource kind used in manifests.
    pub const fn resource_kind(self) -> &'static str {
        match self {
            Self::Logs => "LogPipeline",
            Self::Metrics => "MetricPipeline",
            Self::Traces => "TracePipeline",
        }
    }

    pub fn from_resource_kind(kind: &str) -> Option<Self> {
        match kind {
            "LogPipeline" => Some(Self::Logs),
            "MetricPipeline" => Some(Self::Metrics),
            "TracePipeline" => Some(Self::Traces),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "logs" | "log" | "logpipeline" => Some(Self::Logs),
            "metrics" | "metric" | "metricpipeline" => Some(Self::Metrics),
            "traces" | "trace" | "tracepipeline" => Some(Self::Traces),
            _ => None,
        }
    }

    /// Condition type written to the cluster-wide aggregate object.
    pub const fn components_condition_type(self) -> &'static str {
        match self {
            Self::Logs => "LogComponentsHealthy",
            Self::Metrics => "MetricComponentsHealthy",
            Self::Traces => "TraceComponentsHealthy",
        }
    }

    /// Unit used by collector self-metrics for this signal.
    pub const fn signal_unit(self) -> &'static str {
        match self {
            Self::Logs => "log_records",
            Self::Metrics => "metric_points",
            Self::Traces => "spans",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|entry| entry == finalizer)
    }

    /// Returns `true` when the finalizer was added.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns `true` when the finalizer was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|entry| entry != finalizer);
        before != self.finalizers.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineSpec {
    Log(LogPipelineSpec),
    Metric(MetricPipelineSpec),
    Trace(TracePipelineSpec),
}

impl PipelineSpec {
    pub fn kind(&self) -> PipelineKind {
        match self {
            Self::Log(_) => PipelineKind::Logs,
            Self::Metric(_) => PipelineKind::Metrics,
            Self::Trace(_) => PipelineKind::Traces,
        }
    }

    pub fn output(&self) -> Option<&PipelineOutput> {
        match self {
            Self::Log(spec) => spec.output.as_ref(),
            Self::Metric(spec) => spec.output.as_ref(),
            Self::Trace(spec) => spec.output.as_ref(),
        }
    }

    /// Whether the pipeline enables at least one input. Trace pipelines always
    /// receive OTLP.
    pub fn has_enabled_input(&self) -> bool {
        match self {
            Self::Log(spec) => spec.input.has_enabled_input(),
            Self::Metric(spec) => spec.input.has_enabled_input(),
            Self::Trace(_) => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pipeline {
    pub metadata: ObjectMeta,
    pub spec: PipelineSpec,
    pub status: PipelineStatus,
}

impl Pipeline {
    pub fn new(metadata: ObjectMeta, spec: PipelineSpec) -> Self {
        Self {
            metadata,
            spec,
            status: PipelineStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn kind(&self) -> PipelineKind {
        self.spec.kind()
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.is_being_deleted()
    }

    pub fn metric(&self) -> Option<&MetricPipelineSpec> {
        match &self.spec {
            PipelineSpec::Metric(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn log(&self) -> Option<&LogPipelineSpec> {
        match &self.spec {
            PipelineSpec::Log(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn trace(&self) -> Option<&TracePipelineSpec> {
        match &self.spec {
            PipelineSpec::Trace(spec) => Some(spec),
            _ => None,
        }
    }

    /// Key used to order pipelines for admission: oldest first, then by name.
    pub fn admission_key(&self) -> (Option<DateTime<Utc>>, &str) {
        (self.metadata.creation_timestamp, self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_resource_kind() {
        for kind in PipelineKind::ALL {
            assert_eq!(PipelineKind::from_resource_kind(kind.resource_kind()), Some(kind));
        }
        assert_eq!(PipelineKind::parse(" Metrics "), Some(PipelineKind::Metrics));
        assert_eq!(PipelineKind::parse("profiles"), None);
    }

    #[test]
    fn finalizer_helpers_report_changes() {
        let mut meta = ObjectMeta::named("alpha");
        assert!(meta.add_finalizer(PIPELINE_FINALIZER));
        assert!(!meta.add_finalizer(PIPELINE_FINALIZER));
        assert!(meta.remove_finalizer(PIPELINE_FINALIZER));
        assert!(!meta.remove_finalizer(PIPELINE_FINALIZER));
    }

    #[test]
    fn trace_pipelines_always_have_input() {
        let spec = PipelineSpec::Trace(TracePipelineSpec::default());
        assert!(spec.has_enabled_input());
        let spec = PipelineSpec::Metric(MetricPipelineSpec::default());
        assert!(!spec.has_enabled_input());
    }
}
