use super::output::PipelineOutput;
use serde::{Deserialize, Serialize};

/// Trace pipelines always receive OTLP; only the output is configurable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracePipelineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PipelineOutput>,
}
