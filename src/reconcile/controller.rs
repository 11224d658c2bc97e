use super::reconciler::{CycleOutcome, Reconciler};
use crate::app_state::AppState;
use crate::kind_event;
use crate::metrics::metrics;
use crate::pipeline::PipelineKind;
use crate::retry::{sleep_with_shutdown, RetryBackoff, RetrySettings};
use crate::store::ChangeEvent;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

const TARGET: &str = "telemetry_manager::controller";

/// Single task driving one kind's reconciler.
///
/// Cycles never overlap. Change events arriving while a cycle runs cancel
/// that cycle and collapse into exactly one follow-up cycle; events queued
/// between cycles are drained before the next one starts.
pub struct KindController {
    reconciler: Reconciler,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    resync: Duration,
    backoff: RetryBackoff,
    state: AppState,
}

impl KindController {
    pub fn new(
        reconciler: Reconciler,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        resync: Duration,
        retry: RetrySettings,
        state: AppState,
    ) -> Self {
        state.register(reconciler.kind());
        Self {
            reconciler,
            events,
            resync,
            backoff: RetryBackoff::new(retry),
            state,
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.reconciler.kind()
    }

    /// Runs until `shutdown` fires. The first cycle starts immediately.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let kind = self.kind();
        let mut pending = true;
        let mut events_open = true;
        kind_event!(
            info,
            TARGET,
            "loop_started",
            kind = kind,
            resync = humantime::format_duration(self.resync)
        );

        loop {
            if !pending {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = self.events.recv(), if events_open => match event {
                        Some(event) => {
                            kind_event!(
                                debug,
                                TARGET,
                                "change_received",
                                kind = kind,
                                pipeline = event.name,
                                action = event.action.as_str()
                            );
                            pending = true;
                        }
                        None => events_open = false,
                    },
                    _ = tokio::time::sleep(self.resync) => pending = true,
                }
                if !pending {
                    continue;
                }
            }
            if shutdown.is_cancelled() {
                break;
            }

            pending = false;
            let coalesced = self.drain_events(&mut events_open);
            if coalesced > 0 {
                kind_event!(debug, TARGET, "changes_coalesced", kind = kind, count = coalesced);
            }

            let cycle_token = shutdown.child_token();
            let started = Instant::now();
            let result = {
                let cycle = self.reconciler.reconcile(&cycle_token);
                tokio::pin!(cycle);
                loop {
                    tokio::select! {
                        result = &mut cycle => break result,
                        event = self.events.recv(), if events_open => match event {
                            Some(_) => {
                                if !pending {
                                    pending = true;
                                    cycle_token.cancel();
                                }
                            }
                            None => events_open = false,
                        },
                    }
                }
            };
            let elapsed = started.elapsed();

            match result {
                Ok(report) => {
                    metrics().record_reconcile_cycle(kind, report.outcome.as_str(), elapsed);
                    if report.outcome == CycleOutcome::Cancelled {
                        kind_event!(debug, TARGET, "cycle_superseded", kind = kind);
                        pending = true;
                        continue;
                    }
                    self.backoff.on_success();
                    self.state
                        .record_success(kind, &report, self.reconciler.health_snapshot());
                    kind_event!(
                        info,
                        TARGET,
                        "cycle_completed",
                        kind = kind,
                        outcome = report.outcome,
                        admitted = report.admitted.len(),
                        rejected = report.rejected.len(),
                        status_writes = report.status_writes,
                        elapsed_ms = elapsed.as_millis()
                    );
                }
                Err(err) => {
                    metrics().record_reconcile_cycle(kind, err.label(), elapsed);
                    self.state.record_failure(kind, &err);
                    if err.is_retryable() {
                        let delay = self.backoff.on_failure();
                        kind_event!(
                            warn,
                            TARGET,
                            "cycle_failed",
                            kind = kind,
                            error = err,
                            failures = self.backoff.failures(),
                            retry_in = humantime::format_duration(delay)
                        );
                        if sleep_with_shutdown(delay, &shutdown).await {
                            break;
                        }
                        pending = true;
                    } else {
                        kind_event!(error, TARGET, "cycle_failed", kind = kind, error = err);
                    }
                }
            }
        }

        kind_event!(info, TARGET, "loop_stopped", kind = kind);
    }

    fn drain_events(&mut self, events_open: &mut bool) -> usize {
        let mut drained = 0;
        loop {
            match self.events.try_recv() {
                Ok(_) => drained += 1,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    *events_open = false;
                    break;
                }
            }
        }
        drained
    }
}
