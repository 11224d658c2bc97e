//! Workload collaborator: deploys the collector that runs a synthesized
//! configuration.

use crate::collector::components::LOG_AGENT_NAME;
use crate::collector::ConfigArtifact;
use crate::pipeline::PipelineKind;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "collector.yaml";
pub const ENV_FILE: &str = "collector.env";
pub const WORKLOAD_FILE: &str = "workload.yaml";
pub const CHECKSUM_ANNOTATION: &str = "checksum/config";

/// Deployment parameters of one kind's collector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadParams {
    pub namespace: String,
    pub image: String,
    pub replicas: u32,
    pub allowed_ports: Vec<u16>,
    pub priority_class: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl Default for WorkloadParams {
    fn default() -> Self {
        Self {
            namespace: "kyma-system".to_string(),
            image: "otel/opentelemetry-collector-contrib:latest".to_string(),
            replicas: 1,
            allowed_ports: vec![4317, 4318, 8888, 13133],
            priority_class: None,
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("workload operation failed transiently: {0}")]
    Transient(String),
    #[error("workload rejected: {0}")]
    Rejected(String),
    #[error("workload i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode workload manifest: {0}")]
    Encode(#[from] serde_yaml::Error),
}

impl WorkloadError {
    /// A definitively rejected request is not retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Io(_))
    }
}

#[async_trait]
pub trait WorkloadApplier: Send + Sync {
    async fn apply(
        &self,
        kind: PipelineKind,
        artifact: &ConfigArtifact,
        params: &WorkloadParams,
    ) -> Result<(), WorkloadError>;

    /// Removes the kind's workload and its access-control objects. Deleting
    /// an absent workload succeeds.
    async fn delete(&self, kind: PipelineKind) -> Result<(), WorkloadError>;
}

/// Name of the collector workload serving `kind`.
pub fn workload_name(kind: PipelineKind) -> String {
    match kind {
        PipelineKind::Logs => LOG_AGENT_NAME.to_string(),
        _ => format!("telemetry-{kind}-collector"),
    }
}

/// Describes the deployable unit written next to the collector config.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadManifest {
    pub kind: &'static str,
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    pub ports: Vec<u16>,
    pub annotations: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub secret_env: Vec<String>,
}

impl WorkloadManifest {
    pub fn new(kind: PipelineKind, artifact: &ConfigArtifact, params: &WorkloadParams) -> Self {
        let (workload_kind, replicas) = match kind {
            PipelineKind::Logs => ("DaemonSet", None),
            _ => ("Deployment", Some(params.replicas)),
        };
        let mut ports = params.allowed_ports.clone();
        ports.sort_unstable();
        ports.dedup();

        Self {
            kind: workload_kind,
            name: workload_name(kind),
            namespace: params.namespace.clone(),
            replicas,
            image: params.image.clone(),
            priority_class_name: params.priority_class.clone(),
            ports,
            annotations: BTreeMap::from([(
                CHECKSUM_ANNOTATION.to_string(),
                artifact.fingerprint.as_str().to_string(),
            )]),
            env: params.env.clone(),
            secret_env: artifact.env.keys().cloned().collect(),
        }
    }
}

/// Writes each kind's artifact below `<root>/<kind>/`.
#[derive(Clone, Debug)]
pub struct FileWorkloadApplier {
    root: PathBuf,
}

impl FileWorkloadApplier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind_dir(&self, kind: PipelineKind) -> PathBuf {
        self.root.join(kind.as_str())
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), WorkloadError> {
    let staging = path.with_extension("tmp");
    tokio::fs::write(&staging, contents).await?;
    tokio::fs::rename(&staging, path).await?;
    Ok(())
}

/// One `KEY=value` line per entry. Values outside the plain character set
/// are double-quoted with `\\`, `"`, `\n` and `\r` escaped, so multi-line
/// PEM material stays on one line.
pub fn render_env(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(key, value)| format!("{key}={}\n", encode_env_value(value)))
        .collect()
}

fn encode_env_value(value: &str) -> String {
    let plain = value.chars().all(|ch| {
        ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | '/' | ':' | '=' | '+')
    });
    if plain {
        return value.to_string();
    }

    let mut encoded = String::with_capacity(value.len() + 2);
    encoded.push('"');
    for ch in value.chars() {
        match ch {
            '"' => encoded.push_str("\\\""),
            '\\' => encoded.push_str("\\\\"),
            '\n' => encoded.push_str("\\n"),
            '\r' => encoded.push_str("\\r"),
            other => encoded.push(other),
        }
    }
    encoded.push('"');
    encoded
}

/// Reads an env file written by [`render_env`].
pub fn parse_env(contents: &str) -> Result<BTreeMap<String, String>, WorkloadError> {
    let mut env = BTreeMap::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (key, raw) = line.split_once('=').ok_or_else(|| {
            WorkloadError::Rejected(format!("env line {} has no `=`", index + 1))
        })?;
        let value = match raw.strip_prefix('"') {
            Some(quoted) => decode_quoted(quoted).ok_or_else(|| {
                WorkloadError::Rejected(format!(
                    "env line {} has a malformed quoted value",
                    index + 1
                ))
            })?,
            None => raw.to_string(),
        };
        env.insert(key.to_string(), value);
    }
    Ok(env)
}

fn decode_quoted(quoted: &str) -> Option<String> {
    let mut value = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => return chars.next().is_none().then_some(value),
            '\\' => match chars.next()? {
                'n' => value.push('\n'),
                'r' => value.push('\r'),
                escaped @ ('"' | '\\') => value.push(escaped),
                _ => return None,
            },
            other => value.push(other),
        }
    }
    None
}

#[async_trait]
impl WorkloadApplier for FileWorkloadApplier {
    async fn apply(
        &self,
        kind: PipelineKind,
        artifact: &ConfigArtifact,
        params: &WorkloadParams,
    ) -> Result<(), WorkloadError> {
        let dir = self.kind_dir(kind);
        tokio::fs::create_dir_all(&dir).await?;

        let manifest = serde_yaml::to_string(&WorkloadManifest::new(kind, artifact, params))?;
        write_atomic(&dir.join(CONFIG_FILE), artifact.yaml.as_bytes()).await?;
        write_atomic(&dir.join(ENV_FILE), render_env(&artifact.env).as_bytes()).await?;
        write_atomic(&dir.join(WORKLOAD_FILE), manifest.as_bytes()).await?;
        Ok(())
    }

    async fn delete(&self, kind: PipelineKind) -> Result<(), WorkloadError> {
        match tokio::fs::remove_dir_all(self.kind_dir(kind)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
