#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use telemetry_manager::backpressure::AdmissionGate;
use telemetry_manager::collector::{ConfigArtifact, ConfigFingerprint};
use telemetry_manager::health::{
    HealthClassifier, HealthProbe, HealthThresholds, ProbeSignals, StaticProbe,
};
use telemetry_manager::pipeline::{
    ApplicationLogInput, IstioInput, LogInput, LogPipelineSpec, MetricInput, MetricPipelineSpec,
    ObjectMeta, OtlpInput, OtlpOutput, Pipeline, PipelineKind, PipelineOutput, PipelineSpec,
    PrometheusInput, RuntimeInput, TracePipelineSpec,
};
use telemetry_manager::reconcile::{Reconciler, ReconcilerParts};
use telemetry_manager::store::{MemoryObjectStore, ObjectStore};
use telemetry_manager::synthesis::{
    ConfigSynthesizer, SynthesisError, SynthesisOptions, SynthesizedConfig, TopologySynthesizer,
};
use telemetry_manager::workload::{WorkloadApplier, WorkloadError, WorkloadParams};

pub fn meta(name: &str, created_secs: i64) -> ObjectMeta {
    let mut metadata = ObjectMeta::named(name);
    metadata.creation_timestamp = Utc.timestamp_opt(created_secs, 0).single();
    metadata
}

pub fn trace_pipeline(name: &str, endpoint: &str) -> Pipeline {
    Pipeline::new(
        meta(name, 0),
        PipelineSpec::Trace(TracePipelineSpec {
            output: Some(PipelineOutput::otlp(OtlpOutput::grpc(endpoint))),
        }),
    )
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MetricInputs {
    pub runtime: bool,
    pub prometheus: bool,
    pub istio: bool,
    pub otlp: bool,
}

impl MetricInputs {
    pub const RUNTIME: Self = Self {
        runtime: true,
        prometheus: false,
        istio: false,
        otlp: false,
    };

    pub fn spec(self) -> MetricInput {
        MetricInput {
            runtime: self.runtime.then(|| RuntimeInput {
                enabled: true,
                ..RuntimeInput::default()
            }),
            prometheus: self.prometheus.then(|| PrometheusInput {
                enabled: true,
                ..PrometheusInput::default()
            }),
            istio: self.istio.then(|| IstioInput {
                enabled: true,
                ..IstioInput::default()
            }),
            otlp: self.otlp.then_some(OtlpInput { enabled: true }),
        }
    }
}

pub fn metric_pipeline(name: &str, inputs: MetricInputs, endpoint: &str) -> Pipeline {
    metric_pipeline_with(name, inputs.spec(), endpoint)
}

pub fn metric_pipeline_with(name: &str, input: MetricInput, endpoint: &str) -> Pipeline {
    Pipeline::new(
        meta(name, 0),
        PipelineSpec::Metric(MetricPipelineSpec {
            input,
            output: Some(PipelineOutput::otlp(OtlpOutput::grpc(endpoint))),
        }),
    )
}

pub fn log_pipeline(name: &str, endpoint: &str) -> Pipeline {
    Pipeline::new(
        meta(name, 0),
        PipelineSpec::Log(LogPipelineSpec {
            input: LogInput {
                application: Some(ApplicationLogInput {
                    enabled: true,
                    ..ApplicationLogInput::default()
                }),
                otlp: Some(OtlpInput { enabled: true }),
            },
            output: Some(PipelineOutput::otlp(OtlpOutput::http(endpoint))),
        }),
    )
}

pub fn created_at(mut pipeline: Pipeline, secs: i64) -> Pipeline {
    pipeline.metadata.creation_timestamp = Utc.timestamp_opt(secs, 0).single();
    pipeline
}

#[derive(Clone, Debug, PartialEq)]
pub enum Applied {
    Apply {
        kind: PipelineKind,
        fingerprint: ConfigFingerprint,
        yaml: String,
    },
    Delete {
        kind: PipelineKind,
    },
}

/// Workload applier that records calls and fails on demand.
#[derive(Clone, Default)]
pub struct RecordingApplier {
    calls: Arc<Mutex<Vec<Applied>>>,
    failures: Arc<Mutex<VecDeque<WorkloadError>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    started: Arc<AtomicUsize>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Applied> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn applies(&self) -> Vec<ConfigFingerprint> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Applied::Apply { fingerprint, .. } => Some(fingerprint),
                Applied::Delete { .. } => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Applied::Delete { .. }))
            .count()
    }

    pub fn last_yaml(&self) -> Option<String> {
        self.calls().into_iter().rev().find_map(|call| match call {
            Applied::Apply { yaml, .. } => Some(yaml),
            Applied::Delete { .. } => None,
        })
    }

    pub fn fail_next(&self, error: WorkloadError) {
        self.failures.lock().expect("failures lock").push_back(error);
    }

    /// Calls entered so far, including ones still in flight.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = Some(delay);
    }

    async fn pause(&self) -> Result<(), WorkloadError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.lock().expect("failures lock").pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WorkloadApplier for RecordingApplier {
    async fn apply(
        &self,
        kind: PipelineKind,
        artifact: &ConfigArtifact,
        _params: &WorkloadParams,
    ) -> Result<(), WorkloadError> {
        self.pause().await?;
        self.calls.lock().expect("calls lock").push(Applied::Apply {
            kind,
            fingerprint: artifact.fingerprint.clone(),
            yaml: artifact.yaml.clone(),
        });
        Ok(())
    }

    async fn delete(&self, kind: PipelineKind) -> Result<(), WorkloadError> {
        self.pause().await?;
        self.calls
            .lock()
            .expect("calls lock")
            .push(Applied::Delete { kind });
        Ok(())
    }
}

/// Delegates to the real synthesizer unless told to fail.
#[derive(Clone, Default)]
pub struct FailingSynthesizer {
    failing: Arc<AtomicBool>,
    inner: TopologySynthesizer,
}

impl FailingSynthesizer {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ConfigSynthesizer for FailingSynthesizer {
    fn synthesize(
        &self,
        kind: PipelineKind,
        pipelines: &[Pipeline],
    ) -> Result<SynthesizedConfig, SynthesisError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SynthesisError::DanglingReferences(vec![
                "traces/otlp: exporter otlp/missing".to_string(),
            ]));
        }
        self.inner.synthesize(kind, pipelines)
    }
}

pub struct Harness {
    pub store: MemoryObjectStore,
    pub applier: RecordingApplier,
    pub probe: StaticProbe,
    pub synthesizer: FailingSynthesizer,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: MemoryObjectStore::new(),
            applier: RecordingApplier::new(),
            probe: StaticProbe::new(ProbeSignals::healthy()),
            synthesizer: FailingSynthesizer::default(),
        }
    }

    pub fn reconciler(&self, kind: PipelineKind, max_pipelines: Option<usize>) -> Reconciler {
        Reconciler::new(ReconcilerParts {
            kind,
            store: Arc::new(self.store.clone()) as Arc<dyn ObjectStore>,
            synthesizer: Arc::new(self.synthesizer.clone()) as Arc<dyn ConfigSynthesizer>,
            applier: Arc::new(self.applier.clone()) as Arc<dyn WorkloadApplier>,
            probe: Arc::new(self.probe.clone()) as Arc<dyn HealthProbe>,
            gate: AdmissionGate::new(max_pipelines),
            classifier: HealthClassifier::new(HealthThresholds::default(), Duration::from_secs(60)),
            params: WorkloadParams::default(),
            apply_timeout: Duration::from_secs(5),
            status_attempts: 3,
        })
    }

    pub async fn create(&self, pipeline: Pipeline) -> Pipeline {
        self.store.create(pipeline).await.expect("create pipeline")
    }
}

pub fn default_options() -> SynthesisOptions {
    SynthesisOptions::default()
}
