#[path = "common/mod.rs"]
mod common;

use common::{
    default_options, log_pipeline, metric_pipeline, metric_pipeline_with, trace_pipeline,
    MetricInputs,
};
use telemetry_manager::collector::components::{self, SignalContext};
use telemetry_manager::collector::CollectorConfig;
use telemetry_manager::pipeline::{
    MetricInput, NameSelector, OtlpOutput, PipelineKind, PipelineOutput, PipelineSpec,
    RuntimeInput, RuntimeResources,
};
use telemetry_manager::synthesis::shared::exporter_id;
use telemetry_manager::synthesis::synthesize;

fn exporter_of(endpoint: &str) -> String {
    exporter_id(&OtlpOutput::grpc(endpoint)).expect("exporter id").0
}

#[test]
fn single_runtime_pipeline_builds_the_runtime_chain() {
    let pipeline = metric_pipeline("runtime", MetricInputs::RUNTIME, "https://backend:4317");
    let synthesized =
        synthesize(PipelineKind::Metrics, &[pipeline], &default_options()).expect("synthesize");
    let config = &synthesized.config;

    assert_eq!(config.pipeline_names(), vec!["metrics/runtime"]);
    let runtime = config.pipeline("metrics/runtime").expect("runtime pipeline");
    assert_eq!(runtime.receivers, vec!["kubeletstats", "k8s_cluster"]);
    assert_eq!(
        runtime.processors,
        vec![
            components::MEMORY_LIMITER.to_string(),
            components::DROP_NON_PVC_VOLUMES.to_string(),
            components::DELETE_SERVICE_NAME.to_string(),
            components::transform_scope_id("runtime"),
            components::INSERT_SKIP_ENRICHMENT.to_string(),
            components::BATCH.to_string(),
        ]
    );
    assert_eq!(runtime.exporters, vec![exporter_of("https://backend:4317")]);
    assert_eq!(config.service.extensions, vec!["health_check", "pprof"]);
    assert_eq!(
        synthesized.pipeline_exporters.get("runtime"),
        Some(&exporter_of("https://backend:4317"))
    );
    assert!(config.dangling_references().is_empty());
}

#[test]
fn runtime_without_volume_metrics_skips_the_volume_filter() {
    let input = MetricInput {
        runtime: Some(RuntimeInput {
            enabled: true,
            resources: RuntimeResources {
                pod: true,
                ..RuntimeResources::none()
            },
            ..RuntimeInput::default()
        }),
        ..MetricInput::default()
    };
    let pipeline = metric_pipeline_with("pods", input, "https://backend:4317");
    let synthesized =
        synthesize(PipelineKind::Metrics, &[pipeline], &default_options()).expect("synthesize");

    let runtime = synthesized
        .config
        .pipeline("metrics/runtime")
        .expect("runtime pipeline");
    assert!(!runtime
        .processors
        .iter()
        .any(|id| id == components::DROP_NON_PVC_VOLUMES));
    assert!(!synthesized
        .config
        .processors
        .contains_key(components::DROP_NON_PVC_VOLUMES));
}

#[test]
fn pipelines_with_equal_outputs_share_one_exporter() {
    let runtime = metric_pipeline("runtime", MetricInputs::RUNTIME, "https://backend:4317");
    let scraping = metric_pipeline(
        "scraping",
        MetricInputs {
            prometheus: true,
            ..MetricInputs::default()
        },
        "https://backend:4317",
    );
    let synthesized = synthesize(
        PipelineKind::Metrics,
        &[runtime, scraping],
        &default_options(),
    )
    .expect("synthesize");
    let config = &synthesized.config;

    assert_eq!(
        config.pipeline_names(),
        vec!["metrics/prometheus", "metrics/runtime"]
    );
    assert_eq!(config.exporters.len(), 1);
    let shared = exporter_of("https://backend:4317");
    for name in ["metrics/prometheus", "metrics/runtime"] {
        assert_eq!(config.pipeline(name).expect(name).exporters, vec![shared.clone()]);
    }
    // one signal-wide copy of the service name scrubber
    assert_eq!(
        config
            .processors
            .keys()
            .filter(|id| id.as_str() == components::DELETE_SERVICE_NAME)
            .count(),
        1
    );
}

#[test]
fn same_input_and_output_collapse_into_one_service_pipeline() {
    let first = metric_pipeline("first", MetricInputs::RUNTIME, "https://backend:4317");
    let second = metric_pipeline("second", MetricInputs::RUNTIME, "https://backend:4317");
    let synthesized = synthesize(PipelineKind::Metrics, &[first, second], &default_options())
        .expect("synthesize");
    let config = &synthesized.config;

    assert_eq!(config.pipeline_names(), vec!["metrics/runtime"]);
    let shared = exporter_of("https://backend:4317");
    assert_eq!(config.exporters.keys().collect::<Vec<_>>(), vec![&shared]);
    assert_eq!(
        config.receivers.keys().collect::<Vec<_>>(),
        vec!["k8s_cluster", "kubeletstats"]
    );

    let runtime = config.pipeline("metrics/runtime").expect("runtime pipeline");
    assert_eq!(runtime.exporters, vec![shared.clone()]);
    let mut unique = runtime.processors.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), runtime.processors.len());
    assert_eq!(synthesized.pipeline_exporters.get("first"), Some(&shared));
    assert_eq!(synthesized.pipeline_exporters.get("second"), Some(&shared));
}

#[test]
fn distinct_outputs_fan_out_from_one_service_pipeline() {
    let first = metric_pipeline("first", MetricInputs::RUNTIME, "https://one:4317");
    let second = metric_pipeline("second", MetricInputs::RUNTIME, "https://two:4317");
    let synthesized = synthesize(PipelineKind::Metrics, &[first, second], &default_options())
        .expect("synthesize");

    let runtime = synthesized
        .config
        .pipeline("metrics/runtime")
        .expect("runtime pipeline");
    let mut expected = vec![exporter_of("https://one:4317"), exporter_of("https://two:4317")];
    expected.sort();
    assert_eq!(runtime.exporters, expected);
}

#[test]
fn namespace_selectors_merge_into_the_most_permissive_filter() {
    let narrow = metric_pipeline_with(
        "narrow",
        MetricInput {
            runtime: Some(RuntimeInput {
                enabled: true,
                namespaces: NameSelector::excluding(["kube-system", "istio-system"]),
                ..RuntimeInput::default()
            }),
            ..MetricInput::default()
        },
        "https://backend:4317",
    );
    let wider = metric_pipeline_with(
        "wider",
        MetricInput {
            runtime: Some(RuntimeInput {
                enabled: true,
                namespaces: NameSelector::excluding(["kube-system"]),
                ..RuntimeInput::default()
            }),
            ..MetricInput::default()
        },
        "https://backend:4317",
    );
    let synthesized = synthesize(PipelineKind::Metrics, &[narrow, wider], &default_options())
        .expect("synthesize");

    let filter_id = components::namespace_filter_id("runtime");
    let expected = components::namespace_filter(
        SignalContext::Metrics,
        &NameSelector::excluding(["kube-system"]),
    );
    assert_eq!(synthesized.config.processors.get(&filter_id), Some(&expected));

    let unrestricted = metric_pipeline("all", MetricInputs::RUNTIME, "https://backend:4317");
    let synthesized = synthesize(
        PipelineKind::Metrics,
        &[
            unrestricted,
            metric_pipeline_with(
                "scoped",
                MetricInput {
                    runtime: Some(RuntimeInput {
                        enabled: true,
                        namespaces: NameSelector::including(["shop"]),
                        ..RuntimeInput::default()
                    }),
                    ..MetricInput::default()
                },
                "https://backend:4317",
            ),
        ],
        &default_options(),
    )
    .expect("synthesize");
    assert!(!synthesized.config.processors.contains_key(&filter_id));
}

#[test]
fn empty_member_set_yields_no_service_pipelines() {
    let synthesized =
        synthesize(PipelineKind::Metrics, &[], &default_options()).expect("synthesize");
    assert!(!synthesized.has_service_pipelines());
    assert!(synthesized.config.exporters.is_empty());
    assert!(synthesized.config.receivers.is_empty());
}

#[test]
fn pipelines_being_deleted_or_of_other_kinds_contribute_nothing() {
    let mut leaving = trace_pipeline("leaving", "https://backend:4317");
    leaving.metadata.deletion_timestamp = Some(chrono::Utc::now());
    let foreign = log_pipeline("logs", "https://backend:4318");

    let synthesized = synthesize(PipelineKind::Traces, &[leaving, foreign], &default_options())
        .expect("synthesize");
    assert!(!synthesized.has_service_pipelines());
    assert!(synthesized.pipeline_exporters.is_empty());
}

#[test]
fn pipeline_without_output_is_skipped() {
    let mut orphan = trace_pipeline("orphan", "https://backend:4317");
    if let PipelineSpec::Trace(spec) = &mut orphan.spec {
        spec.output = Some(PipelineOutput::default());
    }
    let kept = trace_pipeline("kept", "https://kept:4317");

    let synthesized = synthesize(PipelineKind::Traces, &[orphan, kept], &default_options())
        .expect("synthesize");
    let traces = synthesized.config.pipeline("traces/otlp").expect("traces");
    assert_eq!(traces.exporters, vec![exporter_of("https://kept:4317")]);
    assert!(!synthesized.pipeline_exporters.contains_key("orphan"));
}

#[test]
fn log_application_input_needs_file_storage() {
    let synthesized = synthesize(
        PipelineKind::Logs,
        &[log_pipeline("app", "https://backend:4318")],
        &default_options(),
    )
    .expect("synthesize");
    let config = &synthesized.config;

    assert_eq!(config.pipeline_names(), vec!["logs/application", "logs/otlp"]);
    assert!(config.receivers.contains_key(components::FILELOG));
    assert_eq!(
        config.service.extensions,
        vec!["file_storage", "health_check", "pprof"]
    );
    let exporter = exporter_id(&OtlpOutput::http("https://backend:4318"))
        .expect("exporter id")
        .0;
    assert!(exporter.starts_with("otlphttp/"));
    assert_eq!(
        config.pipeline("logs/otlp").expect("otlp").exporters,
        vec![exporter]
    );
}

#[test]
fn rendered_yaml_is_stable_and_parses_back() {
    let pipelines = vec![
        metric_pipeline("b", MetricInputs::RUNTIME, "https://one:4317"),
        metric_pipeline(
            "a",
            MetricInputs {
                otlp: true,
                istio: true,
                ..MetricInputs::default()
            },
            "https://two:4317",
        ),
    ];
    let first = synthesize(PipelineKind::Metrics, &pipelines, &default_options())
        .expect("synthesize")
        .artifact()
        .expect("render");
    let mut reversed = pipelines.clone();
    reversed.reverse();
    let second = synthesize(PipelineKind::Metrics, &reversed, &default_options())
        .expect("synthesize")
        .artifact()
        .expect("render");

    assert_eq!(first.yaml, second.yaml);
    assert_eq!(first.fingerprint, second.fingerprint);

    let parsed = CollectorConfig::from_yaml(&first.yaml).expect("parse");
    assert_eq!(
        parsed.pipeline_names(),
        vec!["metrics/istio", "metrics/otlp", "metrics/runtime"]
    );
    assert!(parsed.dangling_references().is_empty());
}
