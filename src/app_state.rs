use crate::health::ScopeSnapshot;
use crate::pipeline::PipelineKind;
use crate::reconcile::{CycleReport, ReconcileError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RejectedPipeline {
    pub name: String,
    pub reason: &'static str,
}

/// Last known state of one kind's reconcile loop.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LoopStatus {
    pub cycles: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    /// Set after the first successful cycle.
    pub synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub admitted: Vec<String>,
    pub rejected: Vec<RejectedPipeline>,
    pub health: Vec<ScopeSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Shared state exposed to management endpoints and written by the loops.
#[derive(Clone, Debug, Default)]
pub struct AppState {
    loops: Arc<RwLock<BTreeMap<PipelineKind, LoopStatus>>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: PipelineKind) {
        self.loops
            .write()
            .expect("app state poisoned")
            .entry(kind)
            .or_default();
    }

    pub fn record_success(
        &self,
        kind: PipelineKind,
        report: &CycleReport,
        health: Vec<ScopeSnapshot>,
    ) {
        let mut loops = self.loops.write().expect("app state poisoned");
        let status = loops.entry(kind).or_default();
        status.cycles += 1;
        status.consecutive_failures = 0;
        status.synced = true;
        status.last_outcome = Some(report.outcome.as_str());
        status.last_error = None;
        status.fingerprint = report
            .fingerprint
            .as_ref()
            .map(|fingerprint| fingerprint.as_str().to_string());
        status.admitted = report.admitted.clone();
        status.rejected = report
            .rejected
            .iter()
            .map(|(name, reason)| RejectedPipeline {
                name: name.clone(),
                reason: reason.as_str(),
            })
            .collect();
        status.health = health;
        status.last_cycle_at = Some(Utc::now());
    }

    pub fn record_failure(&self, kind: PipelineKind, error: &ReconcileError) {
        let mut loops = self.loops.write().expect("app state poisoned");
        let status = loops.entry(kind).or_default();
        status.cycles += 1;
        status.failures += 1;
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        status.last_outcome = Some(error.label());
        status.last_error = Some(error.to_string());
        status.last_cycle_at = Some(Utc::now());
    }

    /// Ready once every registered loop completed a successful cycle.
    pub fn is_ready(&self) -> bool {
        self.loops
            .read()
            .expect("app state poisoned")
            .values()
            .all(|status| status.synced)
    }

    pub fn loop_status(&self, kind: PipelineKind) -> Option<LoopStatus> {
        self.loops
            .read()
            .expect("app state poisoned")
            .get(&kind)
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, LoopStatus> {
        self.loops
            .read()
            .expect("app state poisoned")
            .iter()
            .map(|(kind, status)| (kind.as_str(), status.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::CycleOutcome;
    use crate::store::StoreError;

    #[test]
    fn ready_after_every_loop_synced() {
        let state = AppState::new();
        state.register(PipelineKind::Logs);
        state.register(PipelineKind::Traces);
        assert!(!state.is_ready());

        let report = CycleReport {
            outcome: CycleOutcome::TornDown,
            admitted: Vec::new(),
            rejected: Vec::new(),
            fingerprint: None,
            status_writes: 1,
            health: None,
        };
        state.record_success(PipelineKind::Logs, &report, Vec::new());
        assert!(!state.is_ready());
        state.record_success(PipelineKind::Traces, &report, Vec::new());
        assert!(state.is_ready());
    }

    #[test]
    fn failures_are_counted_until_success() {
        let state = AppState::new();
        let error = ReconcileError::Store(StoreError::Unavailable("down".to_string()));
        state.record_failure(PipelineKind::Metrics, &error);
        state.record_failure(PipelineKind::Metrics, &error);

        let status = state.loop_status(PipelineKind::Metrics).expect("status");
        assert_eq!(status.failures, 2);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.last_outcome, Some("store_error"));
        assert!(!status.synced);
    }
}
