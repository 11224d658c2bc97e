use crate::pipeline::ConditionStatus;
use serde::Serialize;
use std::fmt;

/// Health reasons in ascending severity. The derived ordering is the
/// priority used when several reasons match at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum HealthReason {
    Healthy,
    Unreachable,
    Throttled,
    BufferFillingUp,
    SomeDataDropped,
    AllDataDropped,
    ConfigNotGenerated,
}

impl HealthReason {
    pub const ALL: [HealthReason; 7] = [
        Self::Healthy,
        Self::Unreachable,
        Self::Throttled,
        Self::BufferFillingUp,
        Self::SomeDataDropped,
        Self::AllDataDropped,
        Self::ConfigNotGenerated,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "Healthy",
            Self::Unreachable => "Unreachable",
            Self::Throttled => "Throttled",
            Self::BufferFillingUp => "BufferFillingUp",
            Self::SomeDataDropped => "SomeDataDropped",
            Self::AllDataDropped => "AllDataDropped",
            Self::ConfigNotGenerated => "ConfigNotGenerated",
        }
    }

    pub const fn severity(self) -> u8 {
        self as u8
    }

    pub const fn is_degraded(self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Reasons that indicate the collectors cannot absorb more load.
    pub const fn is_saturated(self) -> bool {
        matches!(self, Self::Throttled | Self::BufferFillingUp)
    }

    pub const fn condition_status(self) -> ConditionStatus {
        match self {
            Self::Healthy => ConditionStatus::True,
            Self::Unreachable => ConditionStatus::Unknown,
            _ => ConditionStatus::False,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::Healthy => "No problems detected in the telemetry flow",
            Self::Unreachable => "Collector health could not be probed",
            Self::Throttled => "Collector is refusing data because it reached its resource limits",
            Self::BufferFillingUp => {
                "Export buffer is nearing capacity; incoming rate exceeds export rate"
            }
            Self::SomeDataDropped => "Backend is reachable but rejecting some data",
            Self::AllDataDropped => "Backend is unreachable or rejecting all data",
            Self::ConfigNotGenerated => "No collector configuration could be generated",
        }
    }
}

impl fmt::Display for HealthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_follows_declaration_order() {
        let severities: Vec<u8> = HealthReason::ALL.iter().map(|r| r.severity()).collect();
        assert_eq!(severities, vec![0, 1, 2, 3, 4, 5, 6]);
        assert!(HealthReason::AllDataDropped > HealthReason::BufferFillingUp);
    }

    #[test]
    fn condition_status_mapping() {
        assert_eq!(HealthReason::Healthy.condition_status(), ConditionStatus::True);
        assert_eq!(HealthReason::Unreachable.condition_status(), ConditionStatus::Unknown);
        assert_eq!(HealthReason::Throttled.condition_status(), ConditionStatus::False);
    }
}
