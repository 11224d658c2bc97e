use crate::health::HealthReason;
use crate::pipeline::PipelineKind;
use crate::telemetry::{runtime_counters, RuntimeCounters};
use std::sync::OnceLock;
use std::time::Duration;

pub use crate::telemetry::{sample_value, DurationSnapshot, RuntimeCountersSnapshot, Sample};

/// Collector that wraps the runtime counter APIs with a single entrypoint.
pub struct MetricsCollector {
    counters: &'static RuntimeCounters,
}

impl MetricsCollector {
    fn new() -> Self {
        Self {
            counters: runtime_counters(),
        }
    }

    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        self.counters.snapshot()
    }

    pub fn record_reconcile_cycle(&self, kind: PipelineKind, outcome: &str, duration: Duration) {
        self.counters
            .record_reconcile_cycle(kind.as_str(), outcome, duration);
    }

    pub fn record_synthesis_failure(&self, kind: PipelineKind) {
        self.counters.record_synthesis_failure(kind.as_str());
    }

    pub fn record_workload_operation(&self, kind: PipelineKind, operation: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.counters
            .record_workload_operation(kind.as_str(), operation, result);
    }

    pub fn record_status_write(&self, kind: PipelineKind, result: &str) {
        self.counters.record_status_write(kind.as_str(), result);
    }

    pub fn record_health_transition(&self, kind: PipelineKind, reason: HealthReason) {
        self.counters
            .record_health_transition(kind.as_str(), reason.as_str());
    }

    pub fn set_pipeline_counts(
        &self,
        kind: PipelineKind,
        admitted: usize,
        rejected: usize,
        deleting: usize,
    ) {
        for (state, count) in [
            ("admitted", admitted),
            ("rejected", rejected),
            ("deleting", deleting),
        ] {
            self.counters
                .set_pipeline_count(kind.as_str(), state, count as u64);
        }
    }
}

/// Returns the shared `MetricsCollector` instance.
pub fn metrics() -> &'static MetricsCollector {
    MetricsCollector::global()
}

/// Prometheus metadata of one labelled family.
#[derive(Clone, Copy)]
pub struct MetricFamily {
    pub name: &'static str,
    pub help: &'static str,
    pub metric_type: &'static str,
}

impl MetricFamily {
    pub fn render(&self, output: &mut String, samples: &[Sample]) {
        output.push_str(&format!("# HELP {} {}\n", self.name, self.help));
        output.push_str(&format!("# TYPE {} {}\n", self.name, self.metric_type));
        for sample in samples {
            output.push_str(&format!(
                "{}{{{}}} {}\n",
                self.name,
                render_labels(&sample.labels),
                sample.value
            ));
        }
    }
}

fn render_labels(labels: &[(&'static str, String)]) -> String {
    labels
        .iter()
        .map(|(name, value)| format!("{name}=\"{}\"", escape_label(value)))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

pub const RECONCILE_CYCLES: MetricFamily = MetricFamily {
    name: "telemetry_reconcile_cycles_total",
    help: "Reconcile cycles by pipeline kind and outcome",
    metric_type: "counter",
};

pub const SYNTHESIS_FAILURES: MetricFamily = MetricFamily {
    name: "telemetry_synthesis_failures_total",
    help: "Synthesis calls that violated an internal invariant",
    metric_type: "counter",
};

pub const WORKLOAD_OPERATIONS: MetricFamily = MetricFamily {
    name: "telemetry_workload_operations_total",
    help: "Workload apply and delete operations by result",
    metric_type: "counter",
};

pub const STATUS_WRITES: MetricFamily = MetricFamily {
    name: "telemetry_status_writes_total",
    help: "Pipeline status writes by result (written, conflict, skipped)",
    metric_type: "counter",
};

pub const HEALTH_TRANSITIONS: MetricFamily = MetricFamily {
    name: "telemetry_health_transitions_total",
    help: "Health reason transitions by pipeline kind and new reason",
    metric_type: "counter",
};

pub const PIPELINES: MetricFamily = MetricFamily {
    name: "telemetry_pipelines",
    help: "Pipelines seen by the last cycle (admitted, rejected, deleting)",
    metric_type: "gauge",
};

/// Renders every family in Prometheus text exposition format.
pub fn render_prometheus(snapshot: &RuntimeCountersSnapshot) -> String {
    let mut output = String::new();
    RECONCILE_CYCLES.render(&mut output, &snapshot.reconcile_cycles);
    SYNTHESIS_FAILURES.render(&mut output, &snapshot.synthesis_failures);
    WORKLOAD_OPERATIONS.render(&mut output, &snapshot.workload_operations);
    STATUS_WRITES.render(&mut output, &snapshot.status_writes);
    HEALTH_TRANSITIONS.render(&mut output, &snapshot.health_transitions);
    PIPELINES.render(&mut output, &snapshot.pipelines);

    if !snapshot.reconcile_durations.is_empty() {
        output.push_str("# HELP telemetry_reconcile_duration_seconds Reconcile cycle latency\n");
        output.push_str("# TYPE telemetry_reconcile_duration_seconds histogram\n");
        for entry in &snapshot.reconcile_durations {
            for (boundary, cumulative) in &entry.buckets {
                output.push_str(&format!(
                    "telemetry_reconcile_duration_seconds_bucket{{kind=\"{}\",le=\"{}\"}} {}\n",
                    entry.kind, boundary, cumulative
                ));
            }
            output.push_str(&format!(
                "telemetry_reconcile_duration_seconds_bucket{{kind=\"{}\",le=\"+Inf\"}} {}\n",
                entry.kind, entry.count
            ));
            output.push_str(&format!(
                "telemetry_reconcile_duration_seconds_sum{{kind=\"{}\"}} {:.6}\n",
                entry.kind, entry.sum
            ));
            output.push_str(&format!(
                "telemetry_reconcile_duration_seconds_count{{kind=\"{}\"}} {}\n",
                entry.kind, entry.count
            ));
        }
    }

    output
}
