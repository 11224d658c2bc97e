use super::output::{OtlpOutput, OtlpProtocol};
use super::selector::NameSelector;
use super::{Pipeline, PipelineSpec};
use thiserror::Error;
use url::Url;

const MAX_NAME_LENGTH: usize = 63;

/// Structural problems found in one pipeline. The pipeline is rejected before
/// synthesis; other pipelines are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pipeline `{pipeline}` is invalid: {}", .problems.join("; "))]
pub struct ValidationError {
    pub pipeline: String,
    pub problems: Vec<String>,
}

impl ValidationError {
    pub fn message(&self) -> String {
        self.problems.join("; ")
    }
}

pub fn validate(pipeline: &Pipeline) -> Result<(), ValidationError> {
    let mut problems = Vec::new();

    validate_name(pipeline.name(), &mut problems);

    match &pipeline.spec {
        PipelineSpec::Metric(spec) => {
            for (input, selector) in spec.input.namespace_selectors() {
                validate_selector(&format!("input.{input}.namespaces"), selector, &mut problems);
            }
        }
        PipelineSpec::Log(spec) => {
            if let Some(application) = spec.input.application.as_ref().filter(|a| a.enabled) {
                validate_selector(
                    "input.application.namespaces",
                    &application.namespaces,
                    &mut problems,
                );
                validate_selector(
                    "input.application.containers",
                    &application.containers,
                    &mut problems,
                );
            }
        }
        PipelineSpec::Trace(_) => {}
    }

    match pipeline.spec.output().and_then(|output| output.otlp.as_ref()) {
        Some(otlp) => validate_otlp_output(otlp, &mut problems),
        None => problems.push("output.otlp is required".to_string()),
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ValidationError {
            pipeline: pipeline.name().to_string(),
            problems,
        })
    }
}

fn validate_name(name: &str, problems: &mut Vec<String>) {
    if !is_dns_label(name) {
        problems.push(format!(
            "metadata.name `{name}` must be a DNS label (lowercase alphanumerics and '-', at most {MAX_NAME_LENGTH} characters)"
        ));
    }
}

fn is_dns_label(name: &str) -> bool {
    let valid_chars = name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-');
    let valid_edges = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

    !name.is_empty() && name.len() <= MAX_NAME_LENGTH && valid_chars && valid_edges
}

fn validate_selector(label: &str, selector: &NameSelector, problems: &mut Vec<String>) {
    if !selector.include.is_empty() && !selector.exclude.is_empty() {
        problems.push(format!("{label} sets both include and exclude"));
    }
    if selector
        .include
        .iter()
        .chain(selector.exclude.iter())
        .any(|name| name.trim().is_empty())
    {
        problems.push(format!("{label} contains an empty name"));
    }
    // Names end up in filter regexes and filelog globs verbatim.
    for name in selector
        .include
        .iter()
        .chain(selector.exclude.iter())
        .filter(|name| !name.trim().is_empty() && !is_dns_label(name))
    {
        problems.push(format!("{label} entry `{name}` must be a DNS label"));
    }
}

fn validate_otlp_output(otlp: &OtlpOutput, problems: &mut Vec<String>) {
    let endpoint = otlp.endpoint.trim();
    if endpoint.is_empty() {
        problems.push("output.otlp.endpoint must not be empty".to_string());
    } else {
        match Url::parse(endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
            Ok(_) | Err(_) => problems.push(format!(
                "output.otlp.endpoint `{endpoint}` must be an http or https URL"
            )),
        }
    }

    if let Some(path) = otlp.path.as_deref() {
        if otlp.protocol == OtlpProtocol::Grpc {
            problems.push("output.otlp.path is only supported with protocol http".to_string());
        } else if !path.starts_with('/') {
            problems.push(format!("output.otlp.path `{path}` must start with '/'"));
        }
    }

    if let Some(auth) = &otlp.basic_auth {
        if auth.user.trim().is_empty() {
            problems.push("output.otlp.basicAuth.user must not be empty".to_string());
        }
        if auth.password.is_empty() {
            problems.push("output.otlp.basicAuth.password must not be empty".to_string());
        }
    }

    if otlp.headers.keys().any(|name| name.trim().is_empty()) {
        problems.push("output.otlp.headers contains an empty header name".to_string());
    }

    if let Some(tls) = &otlp.tls {
        if tls.cert.is_some() != tls.key.is_some() {
            problems.push(
                "output.otlp.tls.cert and output.otlp.tls.key must be set together".to_string(),
            );
        }
        if tls.insecure && (tls.ca.is_some() || tls.cert.is_some()) {
            problems
                .push("output.otlp.tls.insecure cannot be combined with certificates".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        BasicAuth, MetricInput, MetricPipelineSpec, ObjectMeta, PipelineOutput, RuntimeInput,
        TlsSettings,
    };

    fn metric_pipeline(name: &str, output: Option<OtlpOutput>) -> Pipeline {
        Pipeline::new(
            ObjectMeta::named(name),
            PipelineSpec::Metric(MetricPipelineSpec {
                input: MetricInput {
                    runtime: Some(RuntimeInput {
                        enabled: true,
                        ..RuntimeInput::default()
                    }),
                    ..MetricInput::default()
                },
                output: output.map(PipelineOutput::otlp),
            }),
        )
    }

    #[test]
    fn valid_pipeline_passes() {
        let pipeline = metric_pipeline(
            "backend",
            Some(OtlpOutput::grpc("https://otel.example:4317")),
        );
        assert_eq!(validate(&pipeline), Ok(()));
    }

    #[test]
    fn missing_output_is_reported() {
        let error = validate(&metric_pipeline("backend", None)).unwrap_err();
        assert_eq!(error.problems, vec!["output.otlp is required".to_string()]);
    }

    #[test]
    fn all_problems_are_accumulated() {
        let mut output = OtlpOutput::grpc("collector:4317");
        output.path = Some("/v1/metrics".into());
        output.basic_auth = Some(BasicAuth {
            user: " ".into(),
            password: "secret".into(),
        });
        output.tls = Some(TlsSettings {
            cert: Some("pem".into()),
            ..TlsSettings::default()
        });
        let error = validate(&metric_pipeline("Backend", Some(output))).unwrap_err();
        assert_eq!(error.problems.len(), 5, "{error}");
        assert!(error.problems[0].starts_with("metadata.name `Backend`"));
    }
}
