use super::shared::{self, ExporterSet};
use super::{SynthesisError, SynthesisOptions};
use crate::collector::components::{self, SignalContext};
use crate::collector::{ComponentRegistry, ServicePipeline};
use crate::pipeline::{NameSelector, Pipeline};
use std::collections::BTreeMap;

pub const APPLICATION: &str = "logs/application";
pub const OTLP: &str = "logs/otlp";

pub fn build(
    members: &[&Pipeline],
    registry: &mut ComponentRegistry,
    exporters: &ExporterSet,
    options: &SynthesisOptions,
) -> Result<BTreeMap<String, ServicePipeline>, SynthesisError> {
    let application: Vec<&Pipeline> = members
        .iter()
        .copied()
        .filter(|pipeline| pipeline.log().is_some_and(|spec| spec.input.application_enabled()))
        .collect();
    let otlp: Vec<&Pipeline> = members
        .iter()
        .copied()
        .filter(|pipeline| pipeline.log().is_some_and(|spec| spec.input.otlp_enabled()))
        .collect();

    let mut pipelines = BTreeMap::new();

    if !application.is_empty() {
        let inputs: Vec<_> = application
            .iter()
            .filter_map(|pipeline| pipeline.log())
            .filter_map(|spec| spec.input.application.as_ref())
            .collect();
        let namespaces = NameSelector::union(inputs.iter().map(|input| &input.namespaces));
        let containers = NameSelector::union(inputs.iter().map(|input| &input.containers));
        let (include, exclude) = components::filelog_globs(&namespaces, &containers, options);

        let receivers = vec![registry.receiver(
            components::FILELOG,
            components::filelog(&include, &exclude),
        )?];
        let processors = vec![
            shared::memory_limiter(registry, options)?,
            registry.processor(components::K8S_ATTRIBUTES, components::k8s_attributes())?,
            registry.processor(
                components::INSERT_CLUSTER_NAME,
                components::insert_cluster_name(options),
            )?,
            registry.processor(
                components::transform_scope_id("application"),
                components::set_instrumentation_scope(
                    SignalContext::Logs,
                    "application",
                    &["filelogreceiver"],
                    options,
                ),
            )?,
            shared::batch(registry, options)?,
        ];
        pipelines.insert(
            APPLICATION.to_string(),
            shared::service_pipeline(receivers, processors, exporters.for_members(&application)),
        );
    }

    if !otlp.is_empty() {
        let receivers = vec![registry.receiver(
            components::OTLP_RECEIVER,
            components::otlp_receiver(),
        )?];
        let processors = vec![
            shared::memory_limiter(registry, options)?,
            registry.processor(components::K8S_ATTRIBUTES, components::k8s_attributes())?,
            registry.processor(
                components::INSERT_CLUSTER_NAME,
                components::insert_cluster_name(options),
            )?,
            shared::batch(registry, options)?,
        ];
        pipelines.insert(
            OTLP.to_string(),
            shared::service_pipeline(receivers, processors, exporters.for_members(&otlp)),
        );
    }

    Ok(pipelines)
}
