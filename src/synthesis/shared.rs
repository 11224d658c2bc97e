//! Pieces shared by every signal: exporters, extensions and chain assembly.

use super::{SynthesisError, SynthesisOptions};
use crate::collector::components::{self, collector_duration};
use crate::collector::fingerprint::short_digest;
use crate::collector::{ComponentRef, ComponentRegistry, ServicePipeline};
use crate::pipeline::{OtlpOutput, OtlpProtocol, Pipeline, PipelineKind};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const EXPORTER_DIGEST_LEN: usize = 8;

/// Exporters registered for one synthesis call.
#[derive(Debug, Default)]
pub struct ExporterSet {
    /// Pipeline name to exporter id.
    pub by_pipeline: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

impl ExporterSet {
    /// Sorted, de-duplicated exporter ids serving `members`.
    pub fn for_members(&self, members: &[&Pipeline]) -> Vec<String> {
        members
            .iter()
            .filter_map(|pipeline| self.by_pipeline.get(pipeline.name()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn insert_env(&mut self, name: String, value: String) -> Result<(), SynthesisError> {
        match self.env.get(&name) {
            Some(existing) if *existing != value => Err(SynthesisError::EnvCollision { name }),
            Some(_) => Ok(()),
            None => {
                self.env.insert(name, value);
                Ok(())
            }
        }
    }
}

/// Exporter id for an output shape: `otlp/<digest>` or `otlphttp/<digest>`,
/// the digest covering every field of the shape. Returns the id and the
/// digest.
pub fn exporter_id(output: &OtlpOutput) -> Result<(String, String), SynthesisError> {
    let canonical = serde_json::to_vec(output)?;
    let digest = short_digest(&canonical, EXPORTER_DIGEST_LEN);
    let prefix = match output.protocol {
        OtlpProtocol::Grpc => "otlp",
        OtlpProtocol::Http => "otlphttp",
    };
    Ok((format!("{prefix}/{digest}"), digest))
}

pub fn register_exporters(
    kind: PipelineKind,
    members: &[&Pipeline],
    registry: &mut ComponentRegistry,
    options: &SynthesisOptions,
) -> Result<ExporterSet, SynthesisError> {
    let mut set = ExporterSet::default();

    for pipeline in members {
        let Some(output) = pipeline
            .spec
            .output()
            .and_then(|output| output.otlp.as_ref())
        else {
            continue;
        };

        let (id, digest) = exporter_id(output)?;
        let (body, env) = exporter_body(kind, output, &digest, options);
        registry.exporter(id.clone(), body)?;
        for (name, value) in env {
            set.insert_env(name, value)?;
        }
        set.by_pipeline.insert(pipeline.name().to_string(), id);
    }

    Ok(set)
}

fn exporter_body(
    kind: PipelineKind,
    output: &OtlpOutput,
    digest: &str,
    options: &SynthesisOptions,
) -> (JsonValue, Vec<(String, String)>) {
    let suffix = digest.to_ascii_uppercase();
    let endpoint = output.endpoint.trim();
    let mut env = Vec::new();
    let mut body = JsonMap::new();

    match (&output.protocol, output.path.as_deref()) {
        (OtlpProtocol::Http, Some(path)) => {
            let joined = format!("{}{}", endpoint.trim_end_matches('/'), path);
            body.insert(format!("{}_endpoint", kind.as_str()), json!(joined));
        }
        _ => {
            body.insert("endpoint".to_string(), json!(endpoint));
        }
    }

    let mut tls = JsonMap::new();
    if let Some(settings) = &output.tls {
        tls.insert("insecure".to_string(), json!(settings.insecure));
        tls.insert(
            "insecure_skip_verify".to_string(),
            json!(settings.insecure_skip_verify),
        );
        let pems = [
            ("ca_pem", "OTLP_TLS_CA", settings.ca.as_ref()),
            ("cert_pem", "OTLP_TLS_CERT", settings.cert.as_ref()),
            ("key_pem", "OTLP_TLS_KEY", settings.key.as_ref()),
        ];
        for (field, prefix, value) in pems {
            if let Some(value) = value {
                let name = format!("{prefix}_{suffix}");
                tls.insert(field.to_string(), json!(format!("${{env:{name}}}")));
                env.push((name, value.clone()));
            }
        }
    } else if endpoint.starts_with("http://") {
        tls.insert("insecure".to_string(), json!(true));
    }
    if !tls.is_empty() {
        body.insert("tls".to_string(), JsonValue::Object(tls));
    }

    let mut headers: JsonMap<String, JsonValue> = output
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), json!(value)))
        .collect();
    if let Some(auth) = &output.basic_auth {
        let name = format!("OTLP_BASIC_AUTH_{suffix}");
        let token = BASE64_STANDARD.encode(format!("{}:{}", auth.user, auth.password));
        headers.insert("Authorization".to_string(), json!(format!("${{env:{name}}}")));
        env.push((name, format!("Basic {token}")));
    }
    if !headers.is_empty() {
        body.insert("headers".to_string(), JsonValue::Object(headers));
    }

    body.insert(
        "sending_queue".to_string(),
        json!({ "enabled": true, "queue_size": options.sending_queue_size }),
    );
    body.insert(
        "retry_on_failure".to_string(),
        json!({
            "enabled": true,
            "initial_interval": collector_duration(Duration::from_secs(5)),
            "max_interval": collector_duration(Duration::from_secs(30)),
            "max_elapsed_time": collector_duration(Duration::from_secs(300)),
        }),
    );

    (JsonValue::Object(body), env)
}

/// Registers the always-present extensions and returns the sorted
/// `service.extensions` list.
pub fn register_extensions(
    registry: &mut ComponentRegistry,
    file_storage: bool,
) -> Result<Vec<String>, SynthesisError> {
    let mut ids = vec![
        registry
            .extension(components::HEALTH_CHECK, components::health_check())?
            .into_id(),
        registry
            .extension(components::PPROF, components::pprof())?
            .into_id(),
    ];
    if file_storage {
        ids.push(
            registry
                .extension(components::FILE_STORAGE, components::file_storage())?
                .into_id(),
        );
    }
    ids.sort();
    Ok(ids)
}

pub fn memory_limiter(
    registry: &mut ComponentRegistry,
    options: &SynthesisOptions,
) -> Result<ComponentRef, SynthesisError> {
    Ok(registry.processor(components::MEMORY_LIMITER, components::memory_limiter(options))?)
}

pub fn batch(
    registry: &mut ComponentRegistry,
    options: &SynthesisOptions,
) -> Result<ComponentRef, SynthesisError> {
    Ok(registry.processor(components::BATCH, components::batch(options))?)
}

pub fn service_pipeline(
    receivers: Vec<ComponentRef>,
    processors: Vec<ComponentRef>,
    exporters: Vec<String>,
) -> ServicePipeline {
    ServicePipeline {
        receivers: receivers.into_iter().map(ComponentRef::into_id).collect(),
        processors: processors.into_iter().map(ComponentRef::into_id).collect(),
        exporters,
    }
}
