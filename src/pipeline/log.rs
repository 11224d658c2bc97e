use super::metric::OtlpInput;
use super::output::PipelineOutput;
use super::selector::{ContainerSelector, NamespaceSelector};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineSpec {
    #[serde(default)]
    pub input: LogInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PipelineOutput>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationLogInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp: Option<OtlpInput>,
}

impl LogInput {
    pub fn application_enabled(&self) -> bool {
        self.application.as_ref().is_some_and(|input| input.enabled)
    }

    pub fn otlp_enabled(&self) -> bool {
        self.otlp.as_ref().is_some_and(|input| input.enabled)
    }

    pub fn has_enabled_input(&self) -> bool {
        self.application_enabled() || self.otlp_enabled()
    }
}

/// Container log tailing from the node file system.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationLogInput {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub namespaces: NamespaceSelector,
    #[serde(default)]
    pub containers: ContainerSelector,
}
