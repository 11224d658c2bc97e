use crate::health::HealthReason;
use crate::pipeline::{validate, ConfigurationReason, Pipeline, ValidationError};
use std::collections::BTreeSet;

/// Why a pipeline was kept out of the synthesized configuration.
#[derive(Clone, Debug, PartialEq)]
pub enum Rejection {
    Invalid(ValidationError),
    MaxPipelinesExceeded { limit: usize },
    Deferred { reason: HealthReason },
}

impl Rejection {
    pub const fn reason(&self) -> ConfigurationReason {
        match self {
            Self::Invalid(_) => ConfigurationReason::ValidationFailed,
            Self::MaxPipelinesExceeded { .. } => ConfigurationReason::MaxPipelinesExceeded,
            Self::Deferred { .. } => ConfigurationReason::AdmissionDeferred,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Invalid(err) => err.message(),
            Self::MaxPipelinesExceeded { limit } => {
                format!("Maximum pipeline count limit {limit} exceeded")
            }
            Self::Deferred { reason } => format!(
                "New pipelines are not admitted while the collectors report {reason}"
            ),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdmissionDecision {
    pub admitted: Vec<Pipeline>,
    pub rejected: Vec<(Pipeline, Rejection)>,
}

impl AdmissionDecision {
    pub fn admitted_names(&self) -> BTreeSet<String> {
        self.admitted
            .iter()
            .map(|pipeline| pipeline.name().to_string())
            .collect()
    }

    pub fn rejection(&self, name: &str) -> Option<&Rejection> {
        self.rejected
            .iter()
            .find(|(pipeline, _)| pipeline.name() == name)
            .map(|(_, rejection)| rejection)
    }
}

/// Decides which active pipelines of one kind enter synthesis.
#[derive(Clone, Debug, Default)]
pub struct AdmissionGate {
    max_pipelines: Option<usize>,
}

impl AdmissionGate {
    pub fn new(max_pipelines: Option<usize>) -> Self {
        Self { max_pipelines }
    }

    pub fn max_pipelines(&self) -> Option<usize> {
        self.max_pipelines
    }

    /// Pipelines are considered oldest first. `previously_admitted` holds the
    /// names admitted by the last cycle; `health` is the kind's current
    /// aggregate reason.
    pub fn decide(
        &self,
        mut candidates: Vec<Pipeline>,
        previously_admitted: &BTreeSet<String>,
        health: Option<HealthReason>,
    ) -> AdmissionDecision {
        candidates.sort_by(|lhs, rhs| lhs.admission_key().cmp(&rhs.admission_key()));
        let saturated = health.filter(|reason| reason.is_saturated());

        let mut decision = AdmissionDecision::default();
        for pipeline in candidates {
            if let Err(err) = validate(&pipeline) {
                decision.rejected.push((pipeline, Rejection::Invalid(err)));
                continue;
            }
            if let Some(limit) = self.max_pipelines {
                if decision.admitted.len() >= limit {
                    decision
                        .rejected
                        .push((pipeline, Rejection::MaxPipelinesExceeded { limit }));
                    continue;
                }
            }
            if let Some(reason) = saturated {
                if !previously_admitted.contains(pipeline.name()) {
                    decision
                        .rejected
                        .push((pipeline, Rejection::Deferred { reason }));
                    continue;
                }
            }
            decision.admitted.push(pipeline);
        }
        decision
    }
}
