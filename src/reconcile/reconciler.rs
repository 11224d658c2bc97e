use super::status::{ComponentsState, FlowUpdate, StatusPlan, StatusWriter};
use super::ReconcileError;
use crate::backpressure::{AdmissionDecision, AdmissionGate};
use crate::collector::{ConfigArtifact, ConfigFingerprint};
use crate::health::{
    HealthClassifier, HealthProbe, HealthReason, HealthScope, ProbeSignals, ProbeTarget,
    ScopeSnapshot,
};
use crate::kind_event;
use crate::metrics::metrics;
use crate::pipeline::{ConfigurationReason, Pipeline, PipelineKind, PIPELINE_FINALIZER};
use crate::store::{ObjectStore, StoreError};
use crate::synthesis::{ConfigSynthesizer, SynthesisError, SynthesizedConfig};
use crate::workload::{WorkloadApplier, WorkloadError, WorkloadParams};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const TARGET: &str = "telemetry_manager::reconcile";

/// What the reconciler last did to the kind's workload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DeployState {
    #[default]
    Unknown,
    Applied(ConfigFingerprint),
    TornDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Applied,
    Unchanged,
    TornDown,
    Cancelled,
}

impl CycleOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::TornDown => "torn_down",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub admitted: Vec<String>,
    pub rejected: Vec<(String, ConfigurationReason)>,
    pub fingerprint: Option<ConfigFingerprint>,
    pub status_writes: usize,
    /// Worst health reason of the kind, `None` when nothing is deployed.
    pub health: Option<HealthReason>,
}

impl CycleReport {
    fn new(outcome: CycleOutcome, decision: &AdmissionDecision) -> Self {
        Self {
            outcome,
            admitted: decision
                .admitted
                .iter()
                .map(|pipeline| pipeline.name().to_string())
                .collect(),
            rejected: decision
                .rejected
                .iter()
                .map(|(pipeline, rejection)| (pipeline.name().to_string(), rejection.reason()))
                .collect(),
            fingerprint: None,
            status_writes: 0,
            health: None,
        }
    }
}

/// Collaborators and settings of one kind's reconciler.
pub struct ReconcilerParts {
    pub kind: PipelineKind,
    pub store: Arc<dyn ObjectStore>,
    pub synthesizer: Arc<dyn ConfigSynthesizer>,
    pub applier: Arc<dyn WorkloadApplier>,
    pub probe: Arc<dyn HealthProbe>,
    pub gate: AdmissionGate,
    pub classifier: HealthClassifier,
    pub params: WorkloadParams,
    pub apply_timeout: Duration,
    pub status_attempts: u32,
}

/// Runs single reconcile cycles for one pipeline kind. The reconciler owns
/// all per-kind state: the deployed fingerprint, the admitted set and the
/// health classifier.
pub struct Reconciler {
    kind: PipelineKind,
    store: Arc<dyn ObjectStore>,
    synthesizer: Arc<dyn ConfigSynthesizer>,
    applier: Arc<dyn WorkloadApplier>,
    probe: Arc<dyn HealthProbe>,
    gate: AdmissionGate,
    classifier: HealthClassifier,
    params: WorkloadParams,
    apply_timeout: Duration,
    status: StatusWriter,
    deploy: DeployState,
    admitted: BTreeSet<String>,
}

struct Deployment {
    config: SynthesizedConfig,
    artifact: ConfigArtifact,
}

impl Reconciler {
    pub fn new(parts: ReconcilerParts) -> Self {
        let status = StatusWriter::new(parts.kind, parts.store.clone(), parts.status_attempts);
        Self {
            kind: parts.kind,
            store: parts.store,
            synthesizer: parts.synthesizer,
            applier: parts.applier,
            probe: parts.probe,
            gate: parts.gate,
            classifier: parts.classifier,
            params: parts.params,
            apply_timeout: parts.apply_timeout,
            status,
            deploy: DeployState::Unknown,
            admitted: BTreeSet::new(),
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn deploy_state(&self) -> &DeployState {
        &self.deploy
    }

    pub fn health_snapshot(&self) -> Vec<ScopeSnapshot> {
        self.classifier.snapshot()
    }

    pub fn classifier(&self) -> &HealthClassifier {
        &self.classifier
    }

    /// Runs one cycle. `cancel` is checked between phases; an apply that
    /// already started always completes and records its fingerprint.
    pub async fn reconcile(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, ReconcileError> {
        let span = tracing::info_span!("reconcile", kind = %self.kind);
        self.run_cycle(cancel).instrument(span).await
    }

    async fn run_cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, ReconcileError> {
        let kind = self.kind;
        let listed = self.store.list(kind).await?;
        let (deleting, active): (Vec<Pipeline>, Vec<Pipeline>) =
            listed.into_iter().partition(Pipeline::is_being_deleted);

        let mut candidates = Vec::with_capacity(active.len());
        for mut pipeline in active {
            if pipeline.metadata.add_finalizer(PIPELINE_FINALIZER) {
                pipeline = self.store.update(pipeline).await?;
            }
            candidates.push(pipeline);
        }

        let aggregate_health = self.classifier.current(&HealthScope::aggregate(kind));
        let decision = self.gate.decide(candidates, &self.admitted, aggregate_health);
        metrics().set_pipeline_counts(
            kind,
            decision.admitted.len(),
            decision.rejected.len(),
            deleting.len(),
        );
        for (pipeline, rejection) in &decision.rejected {
            kind_event!(
                debug,
                TARGET,
                "pipeline_rejected",
                kind = kind,
                pipeline = pipeline.name(),
                reason = rejection.reason().as_str()
            );
        }

        if cancel.is_cancelled() {
            return Ok(CycleReport::new(CycleOutcome::Cancelled, &decision));
        }

        let deployment = match self.synthesize(&decision.admitted) {
            Ok(deployment) => deployment,
            Err(err) => {
                metrics().record_synthesis_failure(kind);
                kind_event!(error, TARGET, "config_not_generated", kind = kind, error = err);
                let detail = err.to_string();
                self.write_failure_statuses(
                    &decision,
                    &StatusPlan::config_not_generated(&detail),
                    ComponentsState::Failed(ConfigurationReason::ConfigNotGenerated),
                )
                .await;
                return Err(err.into());
            }
        };

        let deployed = match &deployment {
            Some(deployment) => self.apply(&deployment.artifact).await,
            None => self.teardown().await,
        };
        let outcome = match deployed {
            Ok(outcome) => outcome,
            Err(err) => {
                kind_event!(warn, TARGET, "workload_failed", kind = kind, error = err);
                let detail = err.to_string();
                self.write_failure_statuses(
                    &decision,
                    &StatusPlan::apply_failed(&detail),
                    ComponentsState::Failed(ConfigurationReason::ApplyFailed),
                )
                .await;
                return Err(err);
            }
        };
        self.admitted = decision.admitted_names();

        let mut report = CycleReport::new(outcome, &decision);
        report.fingerprint = deployment
            .as_ref()
            .map(|deployment| deployment.artifact.fingerprint.clone());

        if cancel.is_cancelled() {
            report.outcome = CycleOutcome::Cancelled;
            return Ok(report);
        }

        let mut pipeline_health = BTreeMap::new();
        let mut worst = None;
        match &deployment {
            Some(deployment) => {
                for pipeline in &decision.admitted {
                    let Some(exporter) = deployment.config.pipeline_exporters.get(pipeline.name())
                    else {
                        continue;
                    };
                    let scope = HealthScope::pipeline(kind, pipeline.name());
                    let reason = self.observe(scope, vec![exporter.clone()]).await;
                    pipeline_health.insert(pipeline.name().to_string(), reason);
                }
                let aggregate = self
                    .observe(HealthScope::aggregate(kind), deployment.config.exporter_ids())
                    .await;
                worst = pipeline_health.values().copied().chain([aggregate]).max();
                self.classifier
                    .retain_pipelines(kind, |name| pipeline_health.contains_key(name));
            }
            None => {
                self.classifier.forget(&HealthScope::aggregate(kind));
                self.classifier.retain_pipelines(kind, |_| false);
            }
        }
        report.health = worst;

        for pipeline in &decision.admitted {
            let plan = match pipeline_health.get(pipeline.name()) {
                Some(reason) => StatusPlan::configured(*reason),
                None => StatusPlan {
                    flow: FlowUpdate::Remove,
                    ..StatusPlan::configured(HealthReason::Healthy)
                },
            };
            if self.status.write(pipeline, &plan).await? {
                report.status_writes += 1;
            }
        }
        for (pipeline, rejection) in &decision.rejected {
            if self.status.write(pipeline, &StatusPlan::rejected(rejection)).await? {
                report.status_writes += 1;
            }
        }
        let components = worst.map_or(ComponentsState::NoPipelines, ComponentsState::Health);
        if self.status.write_aggregate(components).await? {
            report.status_writes += 1;
        }

        for mut pipeline in deleting {
            if !pipeline.metadata.remove_finalizer(PIPELINE_FINALIZER) {
                continue;
            }
            let name = pipeline.name().to_string();
            match self.store.update(pipeline).await {
                Ok(_) | Err(StoreError::NotFound { .. }) => {
                    kind_event!(info, TARGET, "finalizer_removed", kind = kind, pipeline = name);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(report)
    }

    /// `None` means nothing is left to run for this kind.
    fn synthesize(&self, admitted: &[Pipeline]) -> Result<Option<Deployment>, SynthesisError> {
        if admitted.is_empty() {
            return Ok(None);
        }
        let config = self.synthesizer.synthesize(self.kind, admitted)?;
        if !config.has_service_pipelines() {
            return Ok(None);
        }
        let artifact = config.artifact()?;
        Ok(Some(Deployment { config, artifact }))
    }

    async fn apply(&mut self, artifact: &ConfigArtifact) -> Result<CycleOutcome, ReconcileError> {
        if self.deploy == DeployState::Applied(artifact.fingerprint.clone()) {
            kind_event!(
                debug,
                TARGET,
                "config_unchanged",
                kind = self.kind,
                fingerprint = artifact.fingerprint.short()
            );
            return Ok(CycleOutcome::Unchanged);
        }

        let kind = self.kind;
        let call = self.applier.apply(kind, artifact, &self.params);
        self.bounded("apply", call).await?;

        self.deploy = DeployState::Applied(artifact.fingerprint.clone());
        kind_event!(
            info,
            TARGET,
            "config_applied",
            kind = kind,
            fingerprint = artifact.fingerprint.short()
        );
        Ok(CycleOutcome::Applied)
    }

    async fn teardown(&mut self) -> Result<CycleOutcome, ReconcileError> {
        if self.deploy == DeployState::TornDown {
            return Ok(CycleOutcome::Unchanged);
        }

        let kind = self.kind;
        let call = self.applier.delete(kind);
        self.bounded("delete", call).await?;

        self.deploy = DeployState::TornDown;
        kind_event!(info, TARGET, "workload_torn_down", kind = kind);
        Ok(CycleOutcome::TornDown)
    }

    async fn bounded<F>(&self, operation: &'static str, call: F) -> Result<(), ReconcileError>
    where
        F: Future<Output = Result<(), WorkloadError>>,
    {
        let result = match tokio::time::timeout(self.apply_timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ReconcileError::Workload { operation, source }),
            Err(_) => Err(ReconcileError::Timeout {
                operation,
                timeout: self.apply_timeout,
            }),
        };
        metrics().record_workload_operation(self.kind, operation, result.is_ok());
        result
    }

    async fn observe(&mut self, scope: HealthScope, exporters: Vec<String>) -> HealthReason {
        let target = ProbeTarget::new(scope.clone(), exporters);
        let signals = match self.probe.probe(&target).await {
            Ok(signals) => signals,
            Err(err) => {
                kind_event!(
                    warn,
                    TARGET,
                    "probe_failed",
                    kind = self.kind,
                    scope = scope,
                    error = err
                );
                ProbeSignals::unreachable()
            }
        };

        let evaluation = self.classifier.evaluate(&scope, &signals);
        if evaluation.changed && (evaluation.previous.is_some() || evaluation.reason.is_degraded())
        {
            metrics().record_health_transition(self.kind, evaluation.reason);
            kind_event!(
                info,
                TARGET,
                "health_changed",
                kind = self.kind,
                scope = scope,
                from = evaluation.previous.map_or("none", HealthReason::as_str),
                to = evaluation.reason
            );
        }
        evaluation.reason
    }

    /// Best effort: the cycle error is what gets reported and retried.
    async fn write_failure_statuses(
        &self,
        decision: &AdmissionDecision,
        plan: &StatusPlan,
        components: ComponentsState,
    ) {
        let writes = decision
            .admitted
            .iter()
            .map(|pipeline| (pipeline, plan.clone()))
            .chain(
                decision
                    .rejected
                    .iter()
                    .map(|(pipeline, rejection)| (pipeline, StatusPlan::rejected(rejection))),
            );
        for (pipeline, plan) in writes {
            if let Err(err) = self.status.write(pipeline, &plan).await {
                kind_event!(
                    warn,
                    TARGET,
                    "status_write_failed",
                    kind = self.kind,
                    pipeline = pipeline.name(),
                    error = err
                );
            }
        }
        if let Err(err) = self.status.write_aggregate(components).await {
            kind_event!(warn, TARGET, "status_write_failed", kind = self.kind, error = err);
        }
    }
}
