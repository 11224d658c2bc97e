//! Topology synthesizer: merges every active pipeline of one kind into a
//! single collector document.
//!
//! Service pipelines are created per enabled input category
//! (`metrics/runtime`, `logs/application`, ...), never per pipeline. Members
//! of a category share its receivers and processors; differing sub-options
//! are merged as the most-permissive union. Each distinct output shape gets
//! one exporter, shared by every pipeline that declares it.
//!
//! Synthesis is pure. It never fails for structurally valid input; an error
//! here means an internal invariant was violated.

pub mod log;
pub mod metric;
pub mod shared;
pub mod trace;

use crate::collector::{
    components, CollectorConfig, ComponentKind, ComponentRegistry, ConfigArtifact, RegistryError,
    Service,
};
use crate::pipeline::{Pipeline, PipelineKind};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("component registry violation: {0}")]
    Registry(#[from] RegistryError),
    #[error("service pipelines reference undefined components: {}", .0.join(", "))]
    DanglingReferences(Vec<String>),
    #[error("failed to render collector document: {0}")]
    Render(#[from] serde_yaml::Error),
    #[error("failed to encode output shape: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("environment variable `{name}` produced twice with different values")]
    EnvCollision { name: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemoryLimiterOptions {
    pub check_interval: Duration,
    pub limit_percentage: u32,
    pub spike_limit_percentage: u32,
}

impl Default for MemoryLimiterOptions {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            limit_percentage: 75,
            spike_limit_percentage: 15,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BatchOptions {
    pub send_batch_size: u32,
    pub send_batch_max_size: u32,
    pub timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            send_batch_size: 1024,
            send_batch_max_size: 1024,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Cluster-level knobs that shape the synthesized document.
#[derive(Clone, Debug, PartialEq)]
pub struct SynthesisOptions {
    pub cluster_name: String,
    /// Namespace the collectors run in.
    pub self_namespace: String,
    pub instrumentation_scope_version: String,
    pub istio_enabled: bool,
    pub istio_cert_path: String,
    pub self_log_level: String,
    pub metrics_port: u16,
    pub scrape_interval: Duration,
    pub sending_queue_size: u32,
    pub memory_limiter: MemoryLimiterOptions,
    pub batch: BatchOptions,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            cluster_name: "local".to_string(),
            self_namespace: "kyma-system".to_string(),
            instrumentation_scope_version: env!("CARGO_PKG_VERSION").to_string(),
            istio_enabled: false,
            istio_cert_path: "/etc/istio-output-certs".to_string(),
            self_log_level: "info".to_string(),
            metrics_port: 8888,
            scrape_interval: Duration::from_secs(30),
            sending_queue_size: 512,
            memory_limiter: MemoryLimiterOptions::default(),
            batch: BatchOptions::default(),
        }
    }
}

/// Result of one synthesis call.
#[derive(Clone, Debug, PartialEq)]
pub struct SynthesizedConfig {
    pub kind: PipelineKind,
    pub config: CollectorConfig,
    /// Secret material referenced from the document as `${env:NAME}`.
    pub env: BTreeMap<String, String>,
    /// Exporter id serving each contributing pipeline.
    pub pipeline_exporters: BTreeMap<String, String>,
}

impl SynthesizedConfig {
    pub fn artifact(&self) -> Result<ConfigArtifact, SynthesisError> {
        Ok(ConfigArtifact::render(
            self.kind,
            &self.config,
            self.env.clone(),
        )?)
    }

    pub fn has_service_pipelines(&self) -> bool {
        !self.config.service.pipelines.is_empty()
    }

    /// Every exporter id in use, sorted.
    pub fn exporter_ids(&self) -> Vec<String> {
        self.config.exporters.keys().cloned().collect()
    }
}

/// Seam used by the reconcile loop so tests can substitute failing
/// synthesizers.
pub trait ConfigSynthesizer: Send + Sync {
    fn synthesize(
        &self,
        kind: PipelineKind,
        pipelines: &[Pipeline],
    ) -> Result<SynthesizedConfig, SynthesisError>;
}

#[derive(Clone, Debug, Default)]
pub struct TopologySynthesizer {
    options: SynthesisOptions,
}

impl TopologySynthesizer {
    pub fn new(options: SynthesisOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SynthesisOptions {
        &self.options
    }
}

impl ConfigSynthesizer for TopologySynthesizer {
    fn synthesize(
        &self,
        kind: PipelineKind,
        pipelines: &[Pipeline],
    ) -> Result<SynthesizedConfig, SynthesisError> {
        synthesize(kind, pipelines, &self.options)
    }
}

/// Builds the collector document for `kind` from `pipelines`.
///
/// Pipelines of other kinds, pipelines being deleted, pipelines without an
/// enabled input and pipelines without an OTLP output contribute nothing. The
/// input order does not matter.
pub fn synthesize(
    kind: PipelineKind,
    pipelines: &[Pipeline],
    options: &SynthesisOptions,
) -> Result<SynthesizedConfig, SynthesisError> {
    let mut members: Vec<&Pipeline> = pipelines
        .iter()
        .filter(|pipeline| pipeline.kind() == kind && !pipeline.is_being_deleted())
        .filter(|pipeline| pipeline.spec.has_enabled_input())
        .filter(|pipeline| {
            pipeline
                .spec
                .output()
                .and_then(|output| output.otlp.as_ref())
                .is_some()
        })
        .collect();
    members.sort_by(|lhs, rhs| lhs.name().cmp(rhs.name()));

    let mut registry = ComponentRegistry::new();
    let exporters = shared::register_exporters(kind, &members, &mut registry, options)?;

    let pipelines = match kind {
        PipelineKind::Metrics => metric::build(&members, &mut registry, &exporters, options)?,
        PipelineKind::Logs => log::build(&members, &mut registry, &exporters, options)?,
        PipelineKind::Traces => trace::build(&members, &mut registry, &exporters, options)?,
    };

    let needs_file_storage = registry.contains(ComponentKind::Receiver, components::FILELOG);
    let extensions = shared::register_extensions(&mut registry, needs_file_storage)?;

    let service = Service {
        extensions,
        pipelines,
        telemetry: components::service_telemetry(options),
    };
    let config = registry.into_config(service);

    let dangling = config.dangling_references();
    if !dangling.is_empty() {
        return Err(SynthesisError::DanglingReferences(dangling));
    }

    Ok(SynthesizedConfig {
        kind,
        config,
        env: exporters.env,
        pipeline_exporters: exporters.by_pipeline,
    })
}
