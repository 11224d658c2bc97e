use super::shared::{self, ExporterSet};
use super::{SynthesisError, SynthesisOptions};
use crate::collector::components;
use crate::collector::{ComponentRegistry, ServicePipeline};
use crate::pipeline::Pipeline;
use std::collections::BTreeMap;

pub const OTLP: &str = "traces/otlp";

pub fn build(
    members: &[&Pipeline],
    registry: &mut ComponentRegistry,
    exporters: &ExporterSet,
    options: &SynthesisOptions,
) -> Result<BTreeMap<String, ServicePipeline>, SynthesisError> {
    let traces: Vec<&Pipeline> = members
        .iter()
        .copied()
        .filter(|pipeline| pipeline.trace().is_some())
        .collect();

    let mut pipelines = BTreeMap::new();
    if traces.is_empty() {
        return Ok(pipelines);
    }

    let receivers = vec![registry.receiver(
        components::OTLP_RECEIVER,
        components::otlp_receiver(),
    )?];
    let processors = vec![
        shared::memory_limiter(registry, options)?,
        registry.processor(components::K8S_ATTRIBUTES, components::k8s_attributes())?,
        registry.processor(
            components::DROP_NOISY_SPANS,
            components::drop_noisy_spans(options),
        )?,
        registry.processor(
            components::INSERT_CLUSTER_NAME,
            components::insert_cluster_name(options),
        )?,
        shared::batch(registry, options)?,
    ];
    pipelines.insert(
        OTLP.to_string(),
        shared::service_pipeline(receivers, processors, exporters.for_members(&traces)),
    );

    Ok(pipelines)
}
