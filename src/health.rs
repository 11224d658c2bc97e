//! Health classification of the running telemetry flow.

pub mod classifier;
pub mod probe;
pub mod reason;

pub use classifier::{
    classify, matching_reasons, Evaluation, HealthClassifier, HealthScope, HealthThresholds,
    ProbeSignals, ScopeSnapshot, Transition,
};
pub use probe::{HealthProbe, PrometheusProbe, ProbeError, ProbeTarget, StaticProbe};
pub use reason::HealthReason;
