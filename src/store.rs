//! Resource store collaborator: pipeline objects, the cluster-wide aggregate
//! object and per-kind change notifications.

pub mod memory;

pub use memory::MemoryObjectStore;

use crate::pipeline::{AggregateStatus, Pipeline, PipelineKind, PipelineStatus};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

impl ChangeAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: PipelineKind,
    pub name: String,
    pub action: ChangeAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} pipeline `{name}` not found")]
    NotFound { kind: PipelineKind, name: String },
    #[error("{kind} pipeline `{name}` already exists")]
    AlreadyExists { kind: PipelineKind, name: String },
    #[error("conflict writing `{object}`: expected version {expected}, found {actual}")]
    Conflict {
        object: String,
        expected: u64,
        actual: u64,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid object: {0}")]
    Invalid(String),
}

impl StoreError {
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable(_))
    }
}

/// The cluster-wide `Telemetry` object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregateObject {
    pub resource_version: u64,
    pub status: AggregateStatus,
}

/// Writes are optimistic: every mutating call carries the resource version
/// it was derived from and fails with [`StoreError::Conflict`] when the
/// stored object moved on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, kind: PipelineKind) -> Result<Vec<Pipeline>, StoreError>;

    async fn get(&self, kind: PipelineKind, name: &str) -> Result<Pipeline, StoreError>;

    async fn create(&self, pipeline: Pipeline) -> Result<Pipeline, StoreError>;

    /// Replaces metadata and spec. The status is left untouched and the
    /// deletion timestamp cannot be changed through this call.
    async fn update(&self, pipeline: Pipeline) -> Result<Pipeline, StoreError>;

    async fn update_status(
        &self,
        kind: PipelineKind,
        name: &str,
        resource_version: u64,
        status: PipelineStatus,
    ) -> Result<Pipeline, StoreError>;

    /// Marks the object as being deleted, or removes it when no finalizer
    /// holds it.
    async fn delete(&self, kind: PipelineKind, name: &str) -> Result<(), StoreError>;

    async fn get_aggregate(&self) -> Result<AggregateObject, StoreError>;

    async fn update_aggregate_status(
        &self,
        resource_version: u64,
        status: AggregateStatus,
    ) -> Result<AggregateObject, StoreError>;

    /// Change events for one kind. Status-only writes do not produce events.
    fn watch(&self, kind: PipelineKind) -> mpsc::UnboundedReceiver<ChangeEvent>;
}
