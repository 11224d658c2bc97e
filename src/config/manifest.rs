//! Pipeline manifests: Kubernetes-style YAML documents describing
//! `LogPipeline`, `MetricPipeline` and `TracePipeline` objects.

use crate::pipeline::{
    LogPipelineSpec, MetricPipelineSpec, ObjectMeta, Pipeline, PipelineKind, PipelineSpec,
    PipelineStatus, TracePipelineSpec,
};
use crate::store::{ObjectStore, StoreError};
use serde::Deserialize;
use serde_yaml::Value as YamlValue;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const API_VERSION: &str = "telemetry.kyma-project.io/v1alpha1";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} manifest problem(s): {}", .0.len(), .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[serde(default)]
    api_version: Option<String>,
    kind: String,
    metadata: ObjectMeta,
    #[serde(default)]
    spec: YamlValue,
    #[serde(default)]
    status: Option<PipelineStatus>,
}

/// Parses one manifest document.
pub fn parse_document(document: YamlValue) -> Result<Pipeline, String> {
    let raw: RawManifest = serde_yaml::from_value(document).map_err(|err| err.to_string())?;

    if let Some(api_version) = raw.api_version.as_deref() {
        if api_version != API_VERSION {
            return Err(format!(
                "unsupported apiVersion `{api_version}`, expected `{API_VERSION}`"
            ));
        }
    }
    let kind = PipelineKind::from_resource_kind(&raw.kind)
        .ok_or_else(|| format!("unsupported kind `{}`", raw.kind))?;

    let spec_value = match raw.spec {
        YamlValue::Null => YamlValue::Mapping(Default::default()),
        other => other,
    };
    let spec = match kind {
        PipelineKind::Logs => serde_yaml::from_value::<LogPipelineSpec>(spec_value)
            .map(PipelineSpec::Log),
        PipelineKind::Metrics => serde_yaml::from_value::<MetricPipelineSpec>(spec_value)
            .map(PipelineSpec::Metric),
        PipelineKind::Traces => serde_yaml::from_value::<TracePipelineSpec>(spec_value)
            .map(PipelineSpec::Trace),
    }
    .map_err(|err| format!("{} `{}`: spec: {err}", raw.kind, raw.metadata.name))?;

    let mut pipeline = Pipeline::new(raw.metadata, spec);
    pipeline.status = raw.status.unwrap_or_default();
    Ok(pipeline)
}

/// Parses every document of a multi-document YAML string.
pub fn parse_manifests(source: &str, origin: &str) -> Result<Vec<Pipeline>, ManifestError> {
    let mut pipelines = Vec::new();
    let mut problems = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(source).enumerate() {
        let value = match YamlValue::deserialize(document) {
            Ok(YamlValue::Null) => continue,
            Ok(value) => value,
            Err(err) => {
                problems.push(format!("{origin}#{index}: {err}"));
                break;
            }
        };
        match parse_document(value) {
            Ok(pipeline) => pipelines.push(pipeline),
            Err(message) => problems.push(format!("{origin}#{index}: {message}")),
        }
    }

    if problems.is_empty() {
        Ok(pipelines)
    } else {
        Err(ManifestError::Invalid(problems))
    }
}

/// Loads every `*.yaml`/`*.yml` file below `dir` in file-name order. Problems
/// from all files are reported together; duplicate names are rejected.
pub fn load_dir(dir: &Path) -> Result<Vec<Pipeline>, ManifestError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ManifestError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ManifestError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext, "yaml" | "yml"));
        if is_yaml && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut pipelines = Vec::new();
    let mut problems = Vec::new();
    let mut seen = BTreeSet::new();
    for path in files {
        let source = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        let origin = path.display().to_string();
        match parse_manifests(&source, &origin) {
            Ok(parsed) => {
                for pipeline in parsed {
                    let key = (pipeline.kind(), pipeline.name().to_string());
                    if seen.insert(key) {
                        pipelines.push(pipeline);
                    } else {
                        problems.push(format!(
                            "{origin}: duplicate {} `{}`",
                            pipeline.kind().resource_kind(),
                            pipeline.name()
                        ));
                    }
                }
            }
            Err(ManifestError::Invalid(mut found)) => problems.append(&mut found),
            Err(err) => return Err(err),
        }
    }

    if problems.is_empty() {
        Ok(pipelines)
    } else {
        Err(ManifestError::Invalid(problems))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} updated={} deleted={}",
            self.created.len(),
            self.updated.len(),
            self.deleted.len()
        )
    }
}

/// Makes the store's objects of `kinds` match `desired`: missing objects are
/// created, changed specs and labels updated, and objects absent from
/// `desired` deleted.
pub async fn sync_into(
    store: &dyn ObjectStore,
    kinds: &[PipelineKind],
    desired: Vec<Pipeline>,
) -> Result<SyncReport, StoreError> {
    let mut report = SyncReport::default();
    let mut wanted: BTreeMap<(PipelineKind, String), Pipeline> = desired
        .into_iter()
        .filter(|pipeline| kinds.contains(&pipeline.kind()))
        .map(|pipeline| ((pipeline.kind(), pipeline.name().to_string()), pipeline))
        .collect();

    for kind in kinds {
        for mut existing in store.list(*kind).await? {
            let key = (*kind, existing.name().to_string());
            let label = format!("{}/{}", kind, existing.name());
            match wanted.remove(&key) {
                Some(manifest) => {
                    if existing.is_being_deleted() {
                        continue;
                    }
                    if existing.spec != manifest.spec
                        || existing.metadata.labels != manifest.metadata.labels
                    {
                        existing.spec = manifest.spec;
                        existing.metadata.labels = manifest.metadata.labels;
                        store.update(existing).await?;
                        report.updated.push(label);
                    }
                }
                None => {
                    if !existing.is_being_deleted() {
                        store.delete(*kind, &key.1).await?;
                        report.deleted.push(label);
                    }
                }
            }
        }
    }

    for ((kind, name), mut pipeline) in wanted {
        pipeline.metadata.resource_version = 0;
        pipeline.metadata.deletion_timestamp = None;
        pipeline.status = PipelineStatus::default();
        store.create(pipeline).await?;
        report.created.push(format!("{kind}/{name}"));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = r#"
apiVersion: telemetry.kyma-project.io/v1alpha1
kind: TracePipeline
metadata:
  name: backend
spec:
  output:
    otlp:
      endpoint: http://jaeger:4317
"#;

    #[test]
    fn parses_a_trace_pipeline() {
        let pipelines = parse_manifests(TRACE, "inline").expect("manifest");
        assert_eq!(pipelines.len(), 1);
        assert_eq!(pipelines[0].kind(), PipelineKind::Traces);
        assert_eq!(pipelines[0].name(), "backend");
    }

    #[test]
    fn reports_every_broken_document() {
        let source = format!(
            "{TRACE}---\nkind: ProfilePipeline\nmetadata:\n  name: p\n---\nkind: MetricPipeline\nmetadata:\n  name: m\nspec:\n  input: 3\n"
        );
        let err = parse_manifests(&source, "inline").expect_err("invalid");
        let ManifestError::Invalid(problems) = err else {
            panic!("unexpected error kind");
        };
        assert_eq!(problems.len(), 2, "{problems:?}");
        assert!(problems[0].contains("unsupported kind `ProfilePipeline`"));
        assert!(problems[1].starts_with("inline#2: MetricPipeline `m`: spec"));
    }

    #[test]
    fn empty_documents_are_skipped() {
        let source = format!("---\n{TRACE}---\n");
        assert_eq!(parse_manifests(&source, "inline").expect("manifest").len(), 1);
    }
}
