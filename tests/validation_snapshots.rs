#[path = "common/mod.rs"]
mod common;

use common::{log_pipeline, meta, metric_pipeline_with, trace_pipeline};
use insta::assert_snapshot;
use std::collections::BTreeMap;
use telemetry_manager::pipeline::{
    validate, BasicAuth, MetricInput, NameSelector, OtlpOutput, Pipeline, PipelineOutput,
    PipelineSpec, PrometheusInput, RuntimeInput, TlsSettings, TracePipelineSpec,
};

fn expect_validation_error(pipeline: &Pipeline) -> String {
    match validate(pipeline) {
        Ok(()) => panic!("validation should fail"),
        Err(err) => err.to_string(),
    }
}

#[test]
fn trace_pipeline_with_bad_name_and_endpoint() {
    let mut output = OtlpOutput::grpc("ftp://collector");
    output.path = Some("v1/traces".to_string());
    let pipeline = Pipeline::new(
        meta("Bad_Name", 0),
        PipelineSpec::Trace(TracePipelineSpec {
            output: Some(PipelineOutput::otlp(output)),
        }),
    );

    assert_snapshot!(
        expect_validation_error(&pipeline),
        @"pipeline `Bad_Name` is invalid: metadata.name `Bad_Name` must be a DNS label (lowercase alphanumerics and '-', at most 63 characters); output.otlp.endpoint `ftp://collector` must be an http or https URL; output.otlp.path is only supported with protocol http"
    );
}

#[test]
fn metric_pipeline_reports_every_selector_and_output_problem() {
    let input = MetricInput {
        runtime: Some(RuntimeInput {
            enabled: true,
            namespaces: NameSelector {
                include: vec!["shop".to_string()],
                exclude: vec!["kube-system".to_string()],
            },
            ..RuntimeInput::default()
        }),
        prometheus: Some(PrometheusInput {
            enabled: true,
            namespaces: NameSelector::excluding([" "]),
            ..PrometheusInput::default()
        }),
        ..MetricInput::default()
    };
    let mut pipeline = metric_pipeline_with("scraping", input, "https://backend:4318");
    if let PipelineSpec::Metric(spec) = &mut pipeline.spec {
        spec.output = Some(PipelineOutput::otlp(OtlpOutput {
            path: Some("v1/metrics".to_string()),
            basic_auth: Some(BasicAuth {
                user: " ".to_string(),
                password: String::new(),
            }),
            headers: BTreeMap::from([(String::new(), "value".to_string())]),
            tls: Some(TlsSettings {
                insecure: true,
                cert: Some("cert".to_string()),
                ..TlsSettings::default()
            }),
            ..OtlpOutput::http("https://backend:4318")
        }));
    }

    assert_snapshot!(
        expect_validation_error(&pipeline),
        @"pipeline `scraping` is invalid: input.runtime.namespaces sets both include and exclude; input.prometheus.namespaces contains an empty name; output.otlp.path `v1/metrics` must start with '/'; output.otlp.basicAuth.user must not be empty; output.otlp.basicAuth.password must not be empty; output.otlp.headers contains an empty header name; output.otlp.tls.cert and output.otlp.tls.key must be set together; output.otlp.tls.insecure cannot be combined with certificates"
    );
}

#[test]
fn missing_output_is_the_only_problem_reported() {
    let mut pipeline = trace_pipeline("orphan", "https://backend:4317");
    if let PipelineSpec::Trace(spec) = &mut pipeline.spec {
        spec.output = None;
    }

    assert_snapshot!(
        expect_validation_error(&pipeline),
        @"pipeline `orphan` is invalid: output.otlp is required"
    );
}

#[test]
fn selector_entries_must_be_dns_labels() {
    let mut pipeline = log_pipeline("app-logs", "https://backend:4318");
    if let PipelineSpec::Log(spec) = &mut pipeline.spec {
        if let Some(application) = spec.input.application.as_mut() {
            application.namespaces = NameSelector::including(["shop", "prod|kube-system"]);
            application.containers = NameSelector::excluding(["istio-*", "side\"car"]);
        }
    }

    assert_snapshot!(
        expect_validation_error(&pipeline),
        @r#"pipeline `app-logs` is invalid: input.application.namespaces entry `prod|kube-system` must be a DNS label; input.application.containers entry `istio-*` must be a DNS label; input.application.containers entry `side"car` must be a DNS label"#
    );
}

#[test]
fn metric_selector_with_regex_characters_is_rejected() {
    let input = MetricInput {
        runtime: Some(RuntimeInput {
            enabled: true,
            namespaces: NameSelector::excluding(["kube.system"]),
            ..RuntimeInput::default()
        }),
        ..MetricInput::default()
    };
    let pipeline = metric_pipeline_with("runtime", input, "https://backend:4317");

    assert_snapshot!(
        expect_validation_error(&pipeline),
        @"pipeline `runtime` is invalid: input.runtime.namespaces entry `kube.system` must be a DNS label"
    );
}
