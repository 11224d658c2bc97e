//! Status conditions written back to pipeline objects and to the
//! cluster-wide aggregate object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CONDITION_CONFIGURATION_GENERATED: &str = "ConfigurationGenerated";
pub const CONDITION_FLOW_HEALTHY: &str = "TelemetryFlowHealthy";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default)]
    pub observed_generation: i64,
}

impl Condition {
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: 0,
        }
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.observed_generation = generation;
        self
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.last_transition_time = time;
        self
    }
}

/// Upserts `condition`, keeping the previous transition time when the status
/// did not change. Returns `true` when anything observable changed.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    let Some(existing) = conditions
        .iter_mut()
        .find(|entry| entry.condition_type == condition.condition_type)
    else {
        conditions.push(condition);
        return true;
    };

    if existing.status != condition.status {
        *existing = condition;
        return true;
    }

    let changed = existing.reason != condition.reason
        || existing.message != condition.message
        || existing.observed_generation != condition.observed_generation;
    if changed {
        existing.reason = condition.reason;
        existing.message = condition.message;
        existing.observed_generation = condition.observed_generation;
    }
    changed
}

pub fn remove_condition(conditions: &mut Vec<Condition>, condition_type: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|entry| entry.condition_type != condition_type);
    before != conditions.len()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl PipelineStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|entry| entry.condition_type == condition_type)
    }

    pub fn set_condition(&mut self, condition: Condition) -> bool {
        set_condition(&mut self.conditions, condition)
    }

    pub fn remove_condition(&mut self, condition_type: &str) -> bool {
        remove_condition(&mut self.conditions, condition_type)
    }
}

/// Reasons carried by the `ConfigurationGenerated` condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigurationReason {
    Configured,
    ValidationFailed,
    MaxPipelinesExceeded,
    AdmissionDeferred,
    ConfigNotGenerated,
    ApplyFailed,
}

impl ConfigurationReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "Configured",
            Self::ValidationFailed => "ValidationFailed",
            Self::MaxPipelinesExceeded => "MaxPipelinesExceeded",
            Self::AdmissionDeferred => "AdmissionDeferred",
            Self::ConfigNotGenerated => "ConfigNotGenerated",
            Self::ApplyFailed => "ApplyFailed",
        }
    }

    pub const fn status(self) -> ConditionStatus {
        match self {
            Self::Configured => ConditionStatus::True,
            _ => ConditionStatus::False,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateState {
    #[default]
    Ready,
    Warning,
}

impl AggregateState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::Warning => "Warning",
        }
    }
}

/// Status of the cluster-wide `Telemetry` object: one condition per kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStatus {
    #[serde(default)]
    pub state: AggregateState,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl AggregateStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|entry| entry.condition_type == condition_type)
    }

    /// Ready only when every condition is `True`.
    pub fn derive_state(&self) -> AggregateState {
        if self
            .conditions
            .iter()
            .all(|condition| condition.status == ConditionStatus::True)
        {
            AggregateState::Ready
        } else {
            AggregateState::Warning
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn transition_time_survives_reason_change_with_same_status() {
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut status = PipelineStatus::default();

        assert!(status.set_condition(
            Condition::new(CONDITION_FLOW_HEALTHY, ConditionStatus::False, "BufferFillingUp", "")
                .at(first)
        ));
        assert!(status.set_condition(
            Condition::new(CONDITION_FLOW_HEALTHY, ConditionStatus::False, "AllDataDropped", "")
                .at(later)
        ));
        let condition = status.condition(CONDITION_FLOW_HEALTHY).unwrap();
        assert_eq!(condition.reason, "AllDataDropped");
        assert_eq!(condition.last_transition_time, first);
    }

    #[test]
    fn identical_condition_is_not_a_change() {
        let mut status = PipelineStatus::default();
        let condition = Condition::new(
            CONDITION_CONFIGURATION_GENERATED,
            ConditionStatus::True,
            "Configured",
            "collector configuration applied",
        );
        assert!(status.set_condition(condition.clone()));
        assert!(!status.set_condition(condition));
    }

    #[test]
    fn status_flip_replaces_transition_time() {
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::new("A", ConditionStatus::True, "Ok", "").at(first),
        );
        set_condition(
            &mut conditions,
            Condition::new("A", ConditionStatus::False, "Broken", "").at(later),
        );
        assert_eq!(conditions[0].last_transition_time, later);
    }
}
