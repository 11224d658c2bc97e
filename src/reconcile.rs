//! Per-kind reconciliation: one cycle ([`Reconciler`]), the loop driving it
//! ([`KindController`]) and the status writer shared by both.

pub mod controller;
pub mod reconciler;
pub mod status;

pub use controller::KindController;
pub use reconciler::{CycleOutcome, CycleReport, DeployState, Reconciler, ReconcilerParts};
pub use status::{FlowUpdate, StatusPlan, StatusWriter};

use crate::store::StoreError;
use crate::synthesis::SynthesisError;
use crate::workload::WorkloadError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error("workload {operation} failed: {source}")]
    Workload {
        operation: &'static str,
        #[source]
        source: WorkloadError,
    },
    #[error("workload {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl ReconcileError {
    /// Synthesis failures are internal invariant violations; they are
    /// retried with backoff like transient I/O.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            Self::Synthesis(_) | Self::Timeout { .. } => true,
            Self::Workload { source, .. } => source.is_retryable(),
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Store(_) => "store_error",
            Self::Synthesis(_) => "config_not_generated",
            Self::Workload { .. } => "apply_failed",
            Self::Timeout { .. } => "timeout",
        }
    }
}
