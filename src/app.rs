use crate::app_state::AppState;
use crate::backpressure::AdmissionGate;
use crate::config::manifest::{load_dir, sync_into};
use crate::config::ManagerSettings;
use crate::error::{Context, Result};
use crate::health::{HealthClassifier, HealthProbe, PrometheusProbe, ProbeSignals, StaticProbe};
use crate::management::ManagementServer;
use crate::pipeline::PipelineKind;
use crate::reconcile::{KindController, Reconciler, ReconcilerParts};
use crate::retry::sleep_with_shutdown;
use crate::store::{MemoryObjectStore, ObjectStore};
use crate::synthesis::{ConfigSynthesizer, TopologySynthesizer};
use crate::workload::{FileWorkloadApplier, WorkloadApplier};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// External collaborators shared by every reconcile loop.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ObjectStore>,
    pub synthesizer: Arc<dyn ConfigSynthesizer>,
    pub applier: Arc<dyn WorkloadApplier>,
    pub probe: Arc<dyn HealthProbe>,
}

/// Periodically mirrors a directory of pipeline manifests into the store.
pub struct ManifestSync {
    store: Arc<dyn ObjectStore>,
    dir: PathBuf,
    kinds: Vec<PipelineKind>,
    interval: Duration,
}

impl ManifestSync {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        dir: impl Into<PathBuf>,
        kinds: Vec<PipelineKind>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            dir: dir.into(),
            kinds,
            interval,
        }
    }

    /// A directory that fails to load leaves the store untouched.
    pub async fn sync_once(&self) -> Result<()> {
        let pipelines = load_dir(&self.dir)
            .with_context(|| format!("failed to load manifests from {}", self.dir.display()))?;
        let report = sync_into(self.store.as_ref(), &self.kinds, pipelines)
            .await
            .context("failed to sync manifests into the store")?;
        if !report.is_empty() {
            tracing::info!(
                dir = %self.dir.display(),
                created = report.created.len(),
                updated = report.updated.len(),
                deleted = report.deleted.len(),
                "pipeline manifests synced"
            );
        }
        Ok(())
    }

    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            if let Err(err) = self.sync_once().await {
                tracing::warn!(error = %err, "manifest sync failed");
            }
            if sleep_with_shutdown(self.interval, &shutdown).await {
                break;
            }
        }
    }
}

pub struct TelemetryManager {
    state: AppState,
    controllers: Vec<KindController>,
    management: Option<ManagementServer>,
    manifest_sync: Option<ManifestSync>,
    shutdown: CancellationToken,
}

impl TelemetryManager {
    /// Builds one controller per enabled kind on top of `collaborators`.
    pub fn initialise(settings: &ManagerSettings, collaborators: Collaborators) -> Result<Self> {
        let state = AppState::new();
        let mut controllers = Vec::new();

        for kind in settings.enabled_kinds() {
            let Some(kind_settings) = settings.kind(kind) else {
                continue;
            };
            let events = collaborators.store.watch(kind);
            let reconciler = Reconciler::new(ReconcilerParts {
                kind,
                store: collaborators.store.clone(),
                synthesizer: collaborators.synthesizer.clone(),
                applier: collaborators.applier.clone(),
                probe: collaborators.probe.clone(),
                gate: AdmissionGate::new(kind_settings.max_pipelines),
                classifier: HealthClassifier::new(
                    settings.health.thresholds.clone(),
                    settings.health.window,
                ),
                params: kind_settings.workload.clone(),
                apply_timeout: settings.reconcile.apply_timeout,
                status_attempts: settings.reconcile.status_write_attempts,
            });
            controllers.push(KindController::new(
                reconciler,
                events,
                settings.reconcile.resync_interval,
                settings.reconcile.retry.clone(),
                state.clone(),
            ));
        }

        if controllers.is_empty() {
            tracing::warn!("no pipeline kind is enabled; only the management server will run");
        }

        Ok(Self {
            state,
            controllers,
            management: ManagementServer::build(&settings.management)?,
            manifest_sync: None,
            shutdown: CancellationToken::new(),
        })
    }

    /// In-memory store fed from `standalone.pipelines_dir`, collector files
    /// written below `standalone.output_dir`.
    pub fn standalone(settings: &ManagerSettings) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let probe: Arc<dyn HealthProbe> = match &settings.health.prometheus_url {
            Some(url) => Arc::new(
                PrometheusProbe::new(
                    url.as_str(),
                    settings.health.probe_timeout,
                    settings.health.rate_window,
                )
                .context("failed to build prometheus probe")?,
            ),
            None => Arc::new(StaticProbe::new(ProbeSignals::healthy())),
        };
        let collaborators = Collaborators {
            store: store.clone(),
            synthesizer: Arc::new(TopologySynthesizer::new(settings.synthesis.clone())),
            applier: Arc::new(FileWorkloadApplier::new(&settings.standalone.output_dir)),
            probe,
        };

        let mut manager = Self::initialise(settings, collaborators)?;
        manager.manifest_sync = Some(ManifestSync::new(
            store,
            &settings.standalone.pipelines_dir,
            settings.enabled_kinds(),
            settings.standalone.sync_interval,
        ));
        Ok(manager)
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Cancelling this token stops [`TelemetryManager::run`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            state,
            controllers,
            management,
            manifest_sync,
            shutdown,
        } = self;

        if let Some(sync) = &manifest_sync {
            if let Err(err) = sync.sync_once().await {
                tracing::warn!(error = %err, "initial manifest sync failed");
            }
        }

        let mut management_task = management.map(|server| {
            let management_state = state.clone();
            let management_shutdown = shutdown.clone();
            tokio::spawn(async move { server.serve(management_state, management_shutdown).await })
        });

        let mut tasks = JoinSet::new();
        for controller in controllers {
            let loop_shutdown = shutdown.clone();
            tasks.spawn(controller.run(loop_shutdown));
        }
        if let Some(sync) = manifest_sync {
            tasks.spawn(sync.run(shutdown.clone()));
        }

        tracing::info!("telemetry manager ready; press Ctrl+C to stop");

        tokio::select! {
            res = join_optional(&mut management_task), if management_task.is_some() => {
                tracing::warn!("management server task terminated unexpectedly");
                management_task = None;
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        shutdown.cancel();
                        return Err(err);
                    }
                    Err(join_err) => {
                        shutdown.cancel();
                        return Err(crate::err!("management server task join error: {join_err}"));
                    }
                }
            }
            res = tasks.join_next(), if !tasks.is_empty() => {
                tracing::warn!("background task terminated unexpectedly");
                if let Some(Err(join_err)) = res {
                    shutdown.cancel();
                    return Err(crate::err!("background task join error: {join_err}"));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
            }
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested");
            }
        }

        shutdown.cancel();

        let graceful_shutdown = async {
            while let Some(res) = tasks.join_next().await {
                if let Err(join_err) = res {
                    tracing::warn!(error = %join_err, "background task cancelled");
                }
            }
            if let Some(task) = management_task.as_mut() {
                match task.await {
                    Ok(result) => result?,
                    Err(join_err) => {
                        tracing::warn!(error = %join_err, "management server task cancelled");
                    }
                }
            }
            Ok::<(), crate::error::Error>(())
        };

        match timeout(DRAIN_TIMEOUT, graceful_shutdown).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    timeout_secs = DRAIN_TIMEOUT.as_secs_f64(),
                    "graceful shutdown timed out; aborting remaining tasks"
                );
                if let Some(task) = management_task.as_mut() {
                    task.abort();
                }
                tasks.shutdown().await;
                Err(crate::err!(
                    "graceful shutdown timed out after {:?}",
                    DRAIN_TIMEOUT
                ))
            }
        }
    }
}

async fn join_optional<T>(
    task: &mut Option<JoinHandle<T>>,
) -> std::result::Result<T, tokio::task::JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}
