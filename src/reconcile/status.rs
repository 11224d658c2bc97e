//! Status write-back for pipeline objects and the aggregate object.
//!
//! Writes are skipped when nothing observable changed. A conflicting write
//! re-reads the object and re-applies the plan on the fresh copy, up to the
//! configured number of attempts.

use crate::backpressure::Rejection;
use crate::health::HealthReason;
use crate::kind_event;
use crate::metrics::metrics;
use crate::pipeline::status::{CONDITION_CONFIGURATION_GENERATED, CONDITION_FLOW_HEALTHY};
use crate::pipeline::{
    AggregateStatus, Condition, ConditionStatus, ConfigurationReason, Pipeline, PipelineKind,
    PipelineStatus,
};
use crate::store::{ObjectStore, StoreError};
use std::sync::Arc;

pub const NO_PIPELINE_DEPLOYED: &str = "NoPipelineDeployed";

/// What to do with the `TelemetryFlowHealthy` condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowUpdate {
    Set(HealthReason),
    Remove,
    Keep,
}

/// Desired conditions of one pipeline for one cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusPlan {
    pub configuration: ConfigurationReason,
    pub message: String,
    pub flow: FlowUpdate,
}

impl StatusPlan {
    pub fn configured(health: HealthReason) -> Self {
        Self {
            configuration: ConfigurationReason::Configured,
            message: "Collector configuration generated and applied".to_string(),
            flow: FlowUpdate::Set(health),
        }
    }

    pub fn rejected(rejection: &Rejection) -> Self {
        Self {
            configuration: rejection.reason(),
            message: rejection.message(),
            flow: FlowUpdate::Remove,
        }
    }

    pub fn config_not_generated(detail: &str) -> Self {
        Self {
            configuration: ConfigurationReason::ConfigNotGenerated,
            message: format!("Collector configuration could not be generated: {detail}"),
            flow: FlowUpdate::Set(HealthReason::ConfigNotGenerated),
        }
    }

    /// The previous configuration keeps running; the last health reading
    /// stays in place.
    pub fn apply_failed(detail: &str) -> Self {
        Self {
            configuration: ConfigurationReason::ApplyFailed,
            message: format!("Applying the collector workload failed and is retried: {detail}"),
            flow: FlowUpdate::Keep,
        }
    }

    /// Returns the updated status, or `None` when `current` already matches.
    pub fn apply(&self, current: &PipelineStatus, generation: i64) -> Option<PipelineStatus> {
        let mut status = current.clone();
        let mut changed = status.set_condition(
            Condition::new(
                CONDITION_CONFIGURATION_GENERATED,
                self.configuration.status(),
                self.configuration.as_str(),
                self.message.clone(),
            )
            .with_generation(generation),
        );
        changed |= match self.flow {
            FlowUpdate::Set(reason) => status.set_condition(
                Condition::new(
                    CONDITION_FLOW_HEALTHY,
                    reason.condition_status(),
                    reason.as_str(),
                    reason.message(),
                )
                .with_generation(generation),
            ),
            FlowUpdate::Remove => status.remove_condition(CONDITION_FLOW_HEALTHY),
            FlowUpdate::Keep => false,
        };
        changed.then_some(status)
    }
}

/// Summary of one kind written to the aggregate object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentsState {
    NoPipelines,
    Health(HealthReason),
    Failed(ConfigurationReason),
}

impl ComponentsState {
    pub fn condition(self, kind: PipelineKind) -> Condition {
        let condition_type = kind.components_condition_type();
        match self {
            Self::NoPipelines => Condition::new(
                condition_type,
                ConditionStatus::True,
                NO_PIPELINE_DEPLOYED,
                format!("No {} pipelines have been deployed", kind.resource_kind()),
            ),
            Self::Health(reason) => Condition::new(
                condition_type,
                reason.condition_status(),
                reason.as_str(),
                reason.message(),
            ),
            Self::Failed(reason) => Condition::new(
                condition_type,
                ConditionStatus::False,
                reason.as_str(),
                format!("The {kind} collector configuration is not up to date"),
            ),
        }
    }
}

pub struct StatusWriter {
    kind: PipelineKind,
    store: Arc<dyn ObjectStore>,
    attempts: u32,
}

impl StatusWriter {
    pub fn new(kind: PipelineKind, store: Arc<dyn ObjectStore>, attempts: u32) -> Self {
        Self {
            kind,
            store,
            attempts: attempts.max(1),
        }
    }

    /// Writes `plan` onto `pipeline`. Returns `true` when a write happened.
    /// A pipeline that vanished in the meantime is skipped.
    pub async fn write(&self, pipeline: &Pipeline, plan: &StatusPlan) -> Result<bool, StoreError> {
        let mut current = pipeline.clone();
        let mut attempt = 1;
        loop {
            let Some(status) = plan.apply(&current.status, current.metadata.generation) else {
                return Ok(false);
            };
            let result = self
                .store
                .update_status(
                    self.kind,
                    current.name(),
                    current.metadata.resource_version,
                    status,
                )
                .await;
            match result {
                Ok(_) => {
                    metrics().record_status_write(self.kind, "written");
                    return Ok(true);
                }
                Err(StoreError::NotFound { .. }) => {
                    metrics().record_status_write(self.kind, "skipped");
                    return Ok(false);
                }
                Err(err) if err.is_conflict() => {
                    metrics().record_status_write(self.kind, "conflict");
                    if attempt >= self.attempts {
                        return Err(err);
                    }
                    kind_event!(
                        debug,
                        "telemetry_manager::status",
                        "status_conflict",
                        kind = self.kind,
                        pipeline = current.name(),
                        attempt = attempt
                    );
                    current = match self.store.get(self.kind, current.name()).await {
                        Ok(fresh) => fresh,
                        Err(StoreError::NotFound { .. }) => {
                            metrics().record_status_write(self.kind, "skipped");
                            return Ok(false);
                        }
                        Err(err) => return Err(err),
                    };
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Sets this kind's condition on the aggregate object and re-derives its
    /// state.
    pub async fn write_aggregate(&self, state: ComponentsState) -> Result<bool, StoreError> {
        let condition = state.condition(self.kind);
        let mut attempt = 1;
        loop {
            let current = self.store.get_aggregate().await?;
            let mut status: AggregateStatus = current.status.clone();
            let changed = crate::pipeline::status::set_condition(
                &mut status.conditions,
                condition.clone(),
            );
            status.state = status.derive_state();
            if !changed && status.state == current.status.state {
                return Ok(false);
            }

            match self
                .store
                .update_aggregate_status(current.resource_version, status)
                .await
            {
                Ok(_) => {
                    metrics().record_status_write(self.kind, "written");
                    return Ok(true);
                }
                Err(err) if err.is_conflict() && attempt < self.attempts => {
                    metrics().record_status_write(self.kind, "conflict");
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_conflict() {
                        metrics().record_status_write(self.kind, "conflict");
                    }
                    return Err(err);
                }
            }
        }
    }
}
