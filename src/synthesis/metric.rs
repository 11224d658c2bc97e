use super::shared::{self, ExporterSet};
use super::{SynthesisError, SynthesisOptions};
use crate::collector::components::{self, SignalContext};
use crate::collector::{ComponentRef, ComponentRegistry, ServicePipeline};
use crate::pipeline::{MetricPipelineSpec, NameSelector, Pipeline, RuntimeResources};
use std::collections::BTreeMap;

pub const RUNTIME: &str = "metrics/runtime";
pub const PROMETHEUS: &str = "metrics/prometheus";
pub const ISTIO: &str = "metrics/istio";
pub const OTLP: &str = "metrics/otlp";

pub fn build(
    members: &[&Pipeline],
    registry: &mut ComponentRegistry,
    exporters: &ExporterSet,
    options: &SynthesisOptions,
) -> Result<BTreeMap<String, ServicePipeline>, SynthesisError> {
    let specs: Vec<(&Pipeline, &MetricPipelineSpec)> = members
        .iter()
        .filter_map(|pipeline| pipeline.metric().map(|spec| (*pipeline, spec)))
        .collect();

    let runtime = category(&specs, |spec| spec.input.runtime_enabled());
    let prometheus = category(&specs, |spec| spec.input.prometheus_enabled());
    let istio = category(&specs, |spec| spec.input.istio_enabled());
    let otlp = category(&specs, |spec| spec.input.otlp_enabled());

    let mut pipelines = BTreeMap::new();

    // Scraped inputs strip the receiver-assigned service name once, signal wide.
    let scrubber = if !runtime.is_empty() || !prometheus.is_empty() || !istio.is_empty() {
        Some(registry.processor(
            components::DELETE_SERVICE_NAME,
            components::delete_service_name(),
        )?)
    } else {
        None
    };

    if let Some(delete_service_name) = scrubber.as_ref() {
        if !runtime.is_empty() {
            let pipeline =
                runtime_pipeline(&runtime, registry, exporters, options, delete_service_name)?;
            pipelines.insert(RUNTIME.to_string(), pipeline);
        }
        if !prometheus.is_empty() {
            let pipeline = prometheus_pipeline(
                &prometheus,
                registry,
                exporters,
                options,
                delete_service_name,
            )?;
            pipelines.insert(PROMETHEUS.to_string(), pipeline);
        }
        if !istio.is_empty() {
            let pipeline =
                istio_pipeline(&istio, registry, exporters, options, delete_service_name)?;
            pipelines.insert(ISTIO.to_string(), pipeline);
        }
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
        let pipeline = shared::service_pipeline(
            receivers,
            processors,
            exporters.for_members(&pipelines_of(&otlp)),
        );
        pipelines.insert(OTLP.to_string(), pipeline);
    }

    Ok(pipelines)
}

fn category<'a, F>(
    specs: &[(&'a Pipeline, &'a MetricPipelineSpec)],
    enabled: F,
) -> Vec<(&'a Pipeline, &'a MetricPipelineSpec)>
where
    F: Fn(&MetricPipelineSpec) -> bool,
{
    specs
        .iter()
        .filter(|(_, spec)| enabled(spec))
        .copied()
        .collect()
}

fn pipelines_of<'a>(members: &[(&'a Pipeline, &'a MetricPipelineSpec)]) -> Vec<&'a Pipeline> {
    members.iter().map(|(pipeline, _)| *pipeline).collect()
}

fn namespace_filter(
    registry: &mut ComponentRegistry,
    tag: &str,
    selector: &NameSelector,
) -> Result<Option<ComponentRef>, SynthesisError> {
    if selector.is_unrestricted() {
        return Ok(None);
    }
    Ok(Some(registry.processor(
        components::namespace_filter_id(tag),
        components::namespace_filter(SignalContext::Metrics, selector),
    )?))
}

fn runtime_pipeline(
    members: &[(&Pipeline, &MetricPipelineSpec)],
    registry: &mut ComponentRegistry,
    exporters: &ExporterSet,
    options: &SynthesisOptions,
    delete_service_name: &ComponentRef,
) -> Result<ServicePipeline, SynthesisError> {
    let inputs: Vec<_> = members
        .iter()
        .filter_map(|(_, spec)| spec.input.runtime.as_ref())
        .collect();
    let resources = inputs
        .iter()
        .fold(RuntimeResources::none(), |merged, input| {
            merged.union(&input.resources)
        });
    let namespaces = NameSelector::union(inputs.iter().map(|input| &input.namespaces));

    let receivers = vec![
        registry.receiver(
            components::KUBELETSTATS,
            components::kubeletstats(&resources, options),
        )?,
        registry.receiver(
            components::K8S_CLUSTER,
            components::k8s_cluster(&resources, options),
        )?,
    ];

    let mut processors = vec![shared::memory_limiter(registry, options)?];
    if resources.volume {
        processors.push(registry.processor(
            components::DROP_NON_PVC_VOLUMES,
            components::drop_non_pvc_volumes(),
        )?);
    }
    processors.extend(namespace_filter(registry, "runtime", &namespaces)?);
    processors.push(delete_service_name.clone());
    processors.push(registry.processor(
        components::transform_scope_id("runtime"),
        components::set_instrumentation_scope(
            SignalContext::Metrics,
            "runtime",
            &["kubeletstatsreceiver", "k8sclusterreceiver"],
            options,
        ),
    )?);
    processors.push(registry.processor(
        components::INSERT_SKIP_ENRICHMENT,
        components::insert_skip_enrichment(),
    )?);
    processors.push(shared::batch(registry, options)?);

    Ok(shared::service_pipeline(
        receivers,
        processors,
        exporters.for_members(&pipelines_of(members)),
    ))
}

fn prometheus_pipeline(
    members: &[(&Pipeline, &MetricPipelineSpec)],
    registry: &mut ComponentRegistry,
    exporters: &ExporterSet,
    options: &SynthesisOptions,
    delete_service_name: &ComponentRef,
) -> Result<ServicePipeline, SynthesisError> {
    let namespaces = NameSelector::union(
        members
            .iter()
            .filter_map(|(_, spec)| spec.input.prometheus.as_ref())
            .map(|input| &input.namespaces),
    );

    let receivers = vec![
        registry.receiver(
            components::PROMETHEUS_APP_PODS,
            components::prometheus_app_pods(options),
        )?,
        registry.receiver(
            components::PROMETHEUS_APP_SERVICES,
            components::prometheus_app_services(options),
        )?,
    ];

    let mut processors = vec![shared::memory_limiter(registry, options)?];
    processors.extend(namespace_filter(registry, "prometheus", &namespaces)?);
    processors.push(delete_service_name.clone());
    processors.push(registry.processor(
        components::transform_scope_id("prometheus"),
        components::set_instrumentation_scope(
            SignalContext::Metrics,
            "prometheus",
            &["prometheusreceiver"],
            options,
        ),
    )?);
    processors.push(shared::batch(registry, options)?);

    Ok(shared::service_pipeline(
        receivers,
        processors,
        exporters.for_members(&pipelines_of(members)),
    ))
}

fn istio_pipeline(
    members: &[(&Pipeline, &MetricPipelineSpec)],
    registry: &mut ComponentRegistry,
    exporters: &ExporterSet,
    options: &SynthesisOptions,
    delete_service_name: &ComponentRef,
) -> Result<ServicePipeline, SynthesisError> {
    let inputs: Vec<_> = members
        .iter()
        .filter_map(|(_, spec)| spec.input.istio.as_ref())
        .collect();
    let envoy_metrics = inputs.iter().any(|input| input.envoy_metrics);
    let namespaces = NameSelector::union(inputs.iter().map(|input| &input.namespaces));

    let receivers = vec![registry.receiver(
        components::PROMETHEUS_ISTIO,
        components::prometheus_istio(envoy_metrics, options),
    )?];

    let mut processors = vec![
        shared::memory_limiter(registry, options)?,
        registry.processor(
            components::ISTIO_NOISE_FILTER,
            components::istio_noise_filter(),
        )?,
    ];
    processors.extend(namespace_filter(registry, "istio", &namespaces)?);
    processors.push(delete_service_name.clone());
    processors.push(registry.processor(
        components::transform_scope_id("istio"),
        components::set_instrumentation_scope(
            SignalContext::Metrics,
            "istio",
            &["prometheusreceiver"],
            options,
        ),
    )?);
    processors.push(shared::batch(registry, options)?);

    Ok(shared::service_pipeline(
        receivers,
        processors,
        exporters.for_members(&pipelines_of(members)),
    ))
}
