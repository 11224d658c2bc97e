use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt::{self as stdfmt};
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "telemetry-manager";
const DEFAULT_FILTER: &str = "telemetry_manager=info,info";
pub const RECONCILE_DURATION_BUCKETS: [f64; 12] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

pub fn init_tracing() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    let writer = stdout
        .with_max_level(tracing::Level::INFO)
        .or_else(stderr.with_min_level(tracing::Level::WARN));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(false)
        .with_ansi(false)
        .event_format(KeyValueFormatter::new())
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

/// Renders events as `key=value` lines with a fixed field prefix.
pub struct KeyValueFormatter {
    service_name: &'static str,
}

impl KeyValueFormatter {
    pub const fn new() -> Self {
        Self {
            service_name: SERVICE_NAME,
        }
    }
}

impl Default for KeyValueFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for KeyValueFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let pid = std::process::id().to_string();
        let metadata = event.metadata();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());
        let component = visitor
            .target
            .take()
            .unwrap_or_else(|| metadata.target().to_string());

        let mut fields = visitor.fields;
        fields.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));

        let mut line = String::new();
        push_field(&mut line, "ts", &timestamp);
        push_field(&mut line, "level", metadata.level().as_str());
        push_field(&mut line, "service", self.service_name);
        push_field(&mut line, "component", &component);
        push_field(&mut line, "pid", &pid);

        if let Some(span_path) = current_span_path(ctx) {
            push_field(&mut line, "span", &span_path);
        }

        push_field(&mut line, "msg", &message);

        for (key, value) in fields {
            push_field(&mut line, &key, &value);
        }

        if let Some(file) = metadata.file() {
            push_field(&mut line, "file", file);
        }
        if let Some(line_no) = metadata.line() {
            push_field(&mut line, "line", &line_no.to_string());
        }

        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}

fn current_span_path<S, N>(ctx: &FmtContext<'_, S, N>) -> Option<String>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    let span = ctx.lookup_current()?;
    let names: Vec<&str> = span.scope().from_root().map(|s| s.name()).collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join("."))
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    target: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn record_field(&mut self, field: &Field, value: String) {
        match field.name() {
            "" => {}
            "message" => self.message = Some(value),
            "target" => self.target = Some(value),
            name => self.fields.push((name.to_string(), value)),
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_field(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.record_field(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_field(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_field(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_field(field, value.to_string());
    }
}

/// One labelled series of a counter or gauge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub labels: Vec<(&'static str, String)>,
    pub value: u64,
}

impl Sample {
    /// True when the label values equal `values`, in label order.
    pub fn matches(&self, values: &[&str]) -> bool {
        self.labels.len() == values.len()
            && self
                .labels
                .iter()
                .zip(values)
                .all(|((_, actual), expected)| actual == expected)
    }
}

/// Value of the series whose labels equal `values`, zero when absent.
pub fn sample_value(samples: &[Sample], values: &[&str]) -> u64 {
    samples
        .iter()
        .find(|sample| sample.matches(values))
        .map_or(0, |sample| sample.value)
}

#[derive(Clone, Debug, PartialEq)]
pub struct DurationSnapshot {
    pub kind: String,
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuntimeCountersSnapshot {
    pub reconcile_cycles: Vec<Sample>,
    pub synthesis_failures: Vec<Sample>,
    pub workload_operations: Vec<Sample>,
    pub status_writes: Vec<Sample>,
    pub health_transitions: Vec<Sample>,
    pub pipelines: Vec<Sample>,
    pub reconcile_durations: Vec<DurationSnapshot>,
}

struct LabelledRegistry {
    labels: &'static [&'static str],
    inner: Mutex<BTreeMap<Vec<String>, u64>>,
}

impl LabelledRegistry {
    const fn new(labels: &'static [&'static str]) -> Self {
        Self {
            labels,
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    fn key(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn increment(&self, values: &[&str]) {
        let mut guard = self.inner.lock().expect("counter registry poisoned");
        let counter = guard.entry(Self::key(values)).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    fn set(&self, values: &[&str], value: u64) {
        let mut guard = self.inner.lock().expect("counter registry poisoned");
        guard.insert(Self::key(values), value);
    }

    fn snapshot(&self) -> Vec<Sample> {
        let guard = self.inner.lock().expect("counter registry poisoned");
        guard
            .iter()
            .map(|(values, value)| Sample {
                labels: self.labels.iter().copied().zip(values.iter().cloned()).collect(),
                value: *value,
            })
            .collect()
    }
}

#[derive(Default)]
struct DurationBuckets {
    counts: [u64; RECONCILE_DURATION_BUCKETS.len()],
    sum: f64,
    total: u64,
}

impl DurationBuckets {
    fn observe(&mut self, duration_secs: f64) {
        for (idx, boundary) in RECONCILE_DURATION_BUCKETS.iter().enumerate() {
            if duration_secs <= *boundary {
                self.counts[idx] += 1;
            }
        }
        self.sum += duration_secs;
        self.total += 1;
    }

    fn histogram(&self) -> Vec<(f64, u64)> {
        RECONCILE_DURATION_BUCKETS
            .iter()
            .zip(self.counts.iter())
            .map(|(boundary, count)| (*boundary, *count))
            .collect()
    }
}

/// Process-wide counters behind the `/metrics` endpoint.
pub struct RuntimeCounters {
    reconcile_cycles: LabelledRegistry,
    synthesis_failures: LabelledRegistry,
    workload_operations: LabelledRegistry,
    status_writes: LabelledRegistry,
    health_transitions: LabelledRegistry,
    pipelines: LabelledRegistry,
    reconcile_durations: Mutex<BTreeMap<String, DurationBuckets>>,
}

impl Default for RuntimeCounters {
    fn default() -> Self {
        Self {
            reconcile_cycles: LabelledRegistry::new(&["kind", "outcome"]),
            synthesis_failures: LabelledRegistry::new(&["kind"]),
            workload_operations: LabelledRegistry::new(&["kind", "operation", "result"]),
            status_writes: LabelledRegistry::new(&["kind", "result"]),
            health_transitions: LabelledRegistry::new(&["kind", "reason"]),
            pipelines: LabelledRegistry::new(&["kind", "state"]),
            reconcile_durations: Mutex::new(BTreeMap::new()),
        }
    }
}

static RUNTIME_COUNTERS: OnceLock<RuntimeCounters> = OnceLock::new();

pub fn runtime_counters() -> &'static RuntimeCounters {
    RUNTIME_COUNTERS.get_or_init(RuntimeCounters::default)
}

impl RuntimeCounters {
    pub fn record_reconcile_cycle(&self, kind: &str, outcome: &str, duration: Duration) {
        self.reconcile_cycles.increment(&[kind, outcome]);
        let mut durations = self
            .reconcile_durations
            .lock()
            .expect("reconcile durations lock poisoned");
        durations
            .entry(kind.to_string())
            .or_default()
            .observe(duration.as_secs_f64());
    }

    pub fn record_synthesis_failure(&self, kind: &str) {
        self.synthesis_failures.increment(&[kind]);
    }

    pub fn record_workload_operation(&self, kind: &str, operation: &str, result: &str) {
        self.workload_operations
            .increment(&[kind, operation, result]);
    }

    pub fn record_status_write(&self, kind: &str, result: &str) {
        self.status_writes.increment(&[kind, result]);
    }

    pub fn record_health_transition(&self, kind: &str, reason: &str) {
        self.health_transitions.increment(&[kind, reason]);
    }

    pub fn set_pipeline_count(&self, kind: &str, state: &str, count: u64) {
        self.pipelines.set(&[kind, state], count);
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        let durations = self
            .reconcile_durations
            .lock()
            .expect("reconcile durations lock poisoned");
        RuntimeCountersSnapshot {
            reconcile_cycles: self.reconcile_cycles.snapshot(),
            synthesis_failures: self.synthesis_failures.snapshot(),
            workload_operations: self.workload_operations.snapshot(),
            status_writes: self.status_writes.snapshot(),
            health_transitions: self.health_transitions.snapshot(),
            pipelines: self.pipelines.snapshot(),
            reconcile_durations: durations
                .iter()
                .map(|(kind, buckets)| DurationSnapshot {
                    kind: kind.clone(),
                    buckets: buckets.histogram(),
                    sum: buckets.sum,
                    count: buckets.total,
                })
                .collect(),
        }
    }
}

fn encode_field_value(value: &str) -> String {
    let needs_quotes = value.chars().any(|c| {
        c.is_whitespace()
            || matches!(
                c,
                '"' | '\\' | '=' | '[' | ']' | '{' | '}' | ',' | '\n' | '\r' | '\t'
            )
    });

    if !needs_quotes {
        return value.to_string();
    }

    let mut encoded = String::with_capacity(value.len() + 2);
    encoded.push('"');
    for ch in value.chars() {
        match ch {
            '"' => encoded.push_str("\\\""),
            '\\' => encoded.push_str("\\\\"),
            '\n' => encoded.push_str("\\n"),
            '\r' => encoded.push_str("\\r"),
            '\t' => encoded.push_str("\\t"),
            _ => encoded.push(ch),
        }
    }
    encoded.push('"');
    encoded
}

fn push_field(buffer: &mut String, key: &str, value: &str) {
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(key);
    buffer.push('=');
    buffer.push_str(&encode_field_value(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_with_separators_are_quoted() {
        assert_eq!(encode_field_value("plain"), "plain");
        assert_eq!(encode_field_value("a b"), "\"a b\"");
        assert_eq!(encode_field_value("x=\"y\""), "\"x=\\\"y\\\"\"");
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let mut buckets = DurationBuckets::default();
        buckets.observe(0.02);
        buckets.observe(3.0);
        let histogram = buckets.histogram();
        assert_eq!(histogram[0], (0.005, 0));
        assert_eq!(histogram[2], (0.025, 1));
        assert_eq!(histogram[9], (5.0, 2));
        assert_eq!(buckets.total, 2);
    }

    #[test]
    fn labelled_registry_keeps_label_order() {
        let registry = LabelledRegistry::new(&["kind", "result"]);
        registry.increment(&["logs", "written"]);
        registry.increment(&["logs", "written"]);
        registry.set(&["traces", "conflict"], 7);
        let samples = registry.snapshot();
        assert_eq!(sample_value(&samples, &["logs", "written"]), 2);
        assert_eq!(sample_value(&samples, &["traces", "conflict"]), 7);
        assert_eq!(samples[0].labels[0], ("kind", "logs".to_string()));
    }
}
