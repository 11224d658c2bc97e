use super::output::PipelineOutput;
use super::selector::NamespaceSelector;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPipelineSpec {
    #[serde(default)]
    pub input: MetricInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PipelineOutput>,
}

/// Every input is opt-in; a pipeline without any enabled input contributes
/// nothing to the collector topology.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub istio: Option<IstioInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp: Option<OtlpInput>,
}

impl MetricInput {
    pub fn runtime_enabled(&self) -> bool {
        self.runtime.as_ref().is_some_and(|input| input.enabled)
    }

    pub fn prometheus_enabled(&self) -> bool {
        self.prometheus.as_ref().is_some_and(|input| input.enabled)
    }

    pub fn istio_enabled(&self) -> bool {
        self.istio.as_ref().is_some_and(|input| input.enabled)
    }

    pub fn otlp_enabled(&self) -> bool {
        self.otlp.as_ref().is_some_and(|input| input.enabled)
    }

    pub fn has_enabled_input(&self) -> bool {
        self.runtime_enabled()
            || self.prometheus_enabled()
            || self.istio_enabled()
            || self.otlp_enabled()
    }

    /// Namespace selectors of every enabled input, for validation.
    pub fn namespace_selectors(&self) -> Vec<(&'static str, &NamespaceSelector)> {
        let mut selectors = Vec::new();
        if let Some(input) = self.runtime.as_ref().filter(|input| input.enabled) {
            selectors.push(("runtime", &input.namespaces));
        }
        if let Some(input) = self.prometheus.as_ref().filter(|input| input.enabled) {
            selectors.push(("prometheus", &input.namespaces));
        }
        if let Some(input) = self.istio.as_ref().filter(|input| input.enabled) {
            selectors.push(("istio", &input.namespaces));
        }
        selectors
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInput {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub namespaces: NamespaceSelector,
    #[serde(default)]
    pub resources: RuntimeResources,
}

/// Per-resource toggles of the runtime input. All default to enabled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeResources {
    #[serde(default = "default_true")]
    pub pod: bool,
    #[serde(default = "default_true")]
    pub container: bool,
    #[serde(default = "default_true")]
    pub node: bool,
    #[serde(default = "default_true")]
    pub volume: bool,
    #[serde(default = "default_true")]
    pub statefulset: bool,
    #[serde(default = "default_true")]
    pub daemonset: bool,
    #[serde(default = "default_true")]
    pub deployment: bool,
    #[serde(default = "default_true")]
    pub job: bool,
}

impl Default for RuntimeResources {
    fn default() -> Self {
        Self {
            pod: true,
            container: true,
            node: true,
            volume: true,
            statefulset: true,
            daemonset: true,
            deployment: true,
            job: true,
        }
    }
}

impl RuntimeResources {
    pub fn none() -> Self {
        Self {
            pod: false,
            container: false,
            node: false,
            volume: false,
            statefulset: false,
            daemonset: false,
            deployment: false,
            job: false,
        }
    }

    /// Field-wise OR.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            pod: self.pod || other.pod,
            container: self.container || other.container,
            node: self.node || other.node,
            volume: self.volume || other.volume,
            statefulset: self.statefulset || other.statefulset,
            daemonset: self.daemonset || other.daemonset,
            deployment: self.deployment || other.deployment,
            job: self.job || other.job,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusInput {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub namespaces: NamespaceSelector,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IstioInput {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub namespaces: NamespaceSelector,
    #[serde(default)]
    pub envoy_metrics: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtlpInput {
    #[serde(default)]
    pub enabled: bool,
}

const fn default_true() -> bool {
    true
}
