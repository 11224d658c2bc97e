//! Signal classification with priority resolution and hysteresis.
//!
//! Every scope keeps the instant each degraded reason was last observed. The
//! effective reason is the most severe one observed within the hysteresis
//! window, so a severe reading outranks milder ones until it ages out and a
//! scope returns to `Healthy` only after a full window without any degraded
//! reading.

use super::reason::HealthReason;
use crate::pipeline::PipelineKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

const DEFAULT_HISTORY_LIMIT: usize = 32;

/// Signals reported by a probe for one scope.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeSignals {
    pub reachable: bool,
    /// Exporter queue usage, 0.0..=1.0.
    pub buffer_fill_ratio: Option<f64>,
    /// Failed exports over attempted exports, 0.0..=1.0.
    pub export_error_rate: Option<f64>,
    /// Refused over received items at the receivers, 0.0..=1.0.
    pub queue_saturation: Option<f64>,
}

impl Default for ProbeSignals {
    fn default() -> Self {
        Self::healthy()
    }
}

impl ProbeSignals {
    pub const fn healthy() -> Self {
        Self {
            reachable: true,
            buffer_fill_ratio: None,
            export_error_rate: None,
            queue_saturation: None,
        }
    }

    pub const fn unreachable() -> Self {
        Self {
            reachable: false,
            buffer_fill_ratio: None,
            export_error_rate: None,
            queue_saturation: None,
        }
    }

    pub const fn with_buffer_fill(mut self, ratio: f64) -> Self {
        self.buffer_fill_ratio = Some(ratio);
        self
    }

    pub const fn with_error_rate(mut self, rate: f64) -> Self {
        self.export_error_rate = Some(rate);
        self
    }

    pub const fn with_saturation(mut self, ratio: f64) -> Self {
        self.queue_saturation = Some(ratio);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HealthThresholds {
    /// Buffer fill ratio at or above which the buffer is considered filling up.
    pub buffer_filling_up: f64,
    /// Error rate at or above which all data is considered dropped.
    pub all_data_dropped: f64,
    /// Error rate above which some data is considered dropped.
    pub some_data_dropped: f64,
    /// Receiver refusal ratio above which the collector is throttling.
    pub throttling: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            buffer_filling_up: 0.8,
            all_data_dropped: 0.99,
            some_data_dropped: 0.0,
            throttling: 0.0,
        }
    }
}

/// All reasons whose predicate matches, most severe first.
pub fn matching_reasons(
    signals: &ProbeSignals,
    thresholds: &HealthThresholds,
) -> Vec<HealthReason> {
    if !signals.reachable {
        return vec![HealthReason::Unreachable];
    }

    let mut matches = Vec::new();
    if let Some(rate) = finite(signals.export_error_rate) {
        if rate >= thresholds.all_data_dropped {
            matches.push(HealthReason::AllDataDropped);
        } else if rate > thresholds.some_data_dropped {
            matches.push(HealthReason::SomeDataDropped);
        }
    }
    if let Some(ratio) = finite(signals.buffer_fill_ratio) {
        if ratio >= thresholds.buffer_filling_up {
            matches.push(HealthReason::BufferFillingUp);
        }
    }
    if let Some(ratio) = finite(signals.queue_saturation) {
        if ratio > thresholds.throttling {
            matches.push(HealthReason::Throttled);
        }
    }
    matches.sort_by(|lhs, rhs| rhs.cmp(lhs));
    matches
}

/// Highest-priority matching reason, `Healthy` when nothing matches.
pub fn classify(signals: &ProbeSignals, thresholds: &HealthThresholds) -> HealthReason {
    matching_reasons(signals, thresholds)
        .into_iter()
        .next()
        .unwrap_or(HealthReason::Healthy)
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|value| value.is_finite())
}

/// A kind aggregate (`pipeline == None`) or a single pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HealthScope {
    pub kind: PipelineKind,
    pub pipeline: Option<String>,
}

impl HealthScope {
    pub fn aggregate(kind: PipelineKind) -> Self {
        Self {
            kind,
            pipeline: None,
        }
    }

    pub fn pipeline(kind: PipelineKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            pipeline: Some(name.into()),
        }
    }
}

impl fmt::Display for HealthScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pipeline {
            Some(name) => write!(f, "{}/{}", self.kind, name),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: HealthReason,
    pub to: HealthReason,
    pub at: DateTime<Utc>,
}

/// Outcome of one evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub reason: HealthReason,
    /// `None` on the first evaluation of a scope.
    pub previous: Option<HealthReason>,
    pub changed: bool,
    pub since: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScopeSnapshot {
    pub scope: String,
    pub reason: HealthReason,
    pub since: DateTime<Utc>,
    pub transitions: usize,
}

#[derive(Debug)]
struct ScopeState {
    reason: HealthReason,
    since: DateTime<Utc>,
    last_seen: BTreeMap<HealthReason, Instant>,
    history: VecDeque<Transition>,
}

/// Per-loop classifier state. Each reconcile loop owns one instance; scopes
/// never share state.
#[derive(Debug)]
pub struct HealthClassifier {
    thresholds: HealthThresholds,
    window: Duration,
    history_limit: usize,
    scopes: BTreeMap<HealthScope, ScopeState>,
}

impl HealthClassifier {
    pub fn new(thresholds: HealthThresholds, window: Duration) -> Self {
        Self {
            thresholds,
            window,
            history_limit: DEFAULT_HISTORY_LIMIT,
            scopes: BTreeMap::new(),
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn evaluate(&mut self, scope: &HealthScope, signals: &ProbeSignals) -> Evaluation {
        self.evaluate_at(scope, signals, Instant::now(), Utc::now())
    }

    /// Evaluates `signals` observed at `now`. `wall` stamps recorded
    /// transitions.
    pub fn evaluate_at(
        &mut self,
        scope: &HealthScope,
        signals: &ProbeSignals,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Evaluation {
        let candidate = classify(signals, &self.thresholds);
        let window = self.window;
        let history_limit = self.history_limit;

        let previous = self.scopes.get(scope).map(|state| state.reason);
        let state = self
            .scopes
            .entry(scope.clone())
            .or_insert_with(|| ScopeState {
                reason: HealthReason::Healthy,
                since: wall,
                last_seen: BTreeMap::new(),
                history: VecDeque::new(),
            });

        if candidate.is_degraded() {
            state.last_seen.insert(candidate, now);
        }
        state
            .last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < window);

        let effective = state
            .last_seen
            .keys()
            .next_back()
            .copied()
            .map_or(candidate, |held| held.max(candidate));

        let changed = previous != Some(effective);
        if changed {
            state.history.push_back(Transition {
                from: previous.unwrap_or(HealthReason::Healthy),
                to: effective,
                at: wall,
            });
            while state.history.len() > history_limit {
                state.history.pop_front();
            }
            state.reason = effective;
            state.since = wall;
        }

        Evaluation {
            reason: effective,
            previous,
            changed,
            since: state.since,
        }
    }

    pub fn current(&self, scope: &HealthScope) -> Option<HealthReason> {
        self.scopes.get(scope).map(|state| state.reason)
    }

    pub fn history(&self, scope: &HealthScope) -> Vec<Transition> {
        self.scopes
            .get(scope)
            .map(|state| state.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn forget(&mut self, scope: &HealthScope) -> bool {
        self.scopes.remove(scope).is_some()
    }

    /// Drops every pipeline scope of `kind` whose name is not in `keep`.
    pub fn retain_pipelines<F>(&mut self, kind: PipelineKind, keep: F)
    where
        F: Fn(&str) -> bool,
    {
        self.scopes.retain(|scope, _| {
            scope.kind != kind || scope.pipeline.as_deref().map_or(true, &keep)
        });
    }

    pub fn snapshot(&self) -> Vec<ScopeSnapshot> {
        self.scopes
            .iter()
            .map(|(scope, state)| ScopeSnapshot {
                scope: scope.to_string(),
                reason: state.reason,
                since: state.since,
                transitions: state.history.len(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(window_secs: u64) -> HealthClassifier {
        HealthClassifier::new(HealthThresholds::default(), Duration::from_secs(window_secs))
    }

    #[test]
    fn all_data_dropped_beats_buffer_filling_up() {
        let signals = ProbeSignals::healthy()
            .with_buffer_fill(0.95)
            .with_error_rate(1.0);
        let thresholds = HealthThresholds::default();
        assert_eq!(
            matching_reasons(&signals, &thresholds),
            vec![HealthReason::AllDataDropped, HealthReason::BufferFillingUp]
        );
        assert_eq!(classify(&signals, &thresholds), HealthReason::AllDataDropped);
    }

    #[test]
    fn unreachable_masks_other_signals() {
        let mut signals = ProbeSignals::unreachable();
        signals.export_error_rate = Some(1.0);
        assert_eq!(
            classify(&signals, &HealthThresholds::default()),
            HealthReason::Unreachable
        );
    }

    #[test]
    fn nan_signals_are_ignored() {
        let signals = ProbeSignals::healthy().with_error_rate(f64::NAN);
        assert_eq!(
            classify(&signals, &HealthThresholds::default()),
            HealthReason::Healthy
        );
    }

    #[test]
    fn degraded_reason_is_held_for_the_window() {
        let mut classifier = classifier(60);
        let scope = HealthScope::aggregate(PipelineKind::Metrics);
        let start = Instant::now();
        let wall = Utc::now();

        let first = classifier.evaluate_at(
            &scope,
            &ProbeSignals::healthy().with_buffer_fill(0.9),
            start,
            wall,
        );
        assert_eq!(first.reason, HealthReason::BufferFillingUp);
        assert_eq!(first.previous, None);
        assert!(first.changed);

        let held = classifier.evaluate_at(
            &scope,
            &ProbeSignals::healthy(),
            start + Duration::from_secs(30),
            wall,
        );
        assert_eq!(held.reason, HealthReason::BufferFillingUp);
        assert!(!held.changed);

        let recovered = classifier.evaluate_at(
            &scope,
            &ProbeSignals::healthy(),
            start + Duration::from_secs(61),
            wall,
        );
        assert_eq!(recovered.reason, HealthReason::Healthy);
        assert!(recovered.changed);
        assert_eq!(classifier.history(&scope).len(), 2);
    }

    #[test]
    fn severe_reason_ages_out_to_milder_one() {
        let mut classifier = classifier(60);
        let scope = HealthScope::pipeline(PipelineKind::Logs, "app");
        let start = Instant::now();
        let wall = Utc::now();

        classifier.evaluate_at(&scope, &ProbeSignals::healthy().with_error_rate(1.0), start, wall);
        let milder = classifier.evaluate_at(
            &scope,
            &ProbeSignals::healthy().with_buffer_fill(0.9),
            start + Duration::from_secs(10),
            wall,
        );
        assert_eq!(milder.reason, HealthReason::AllDataDropped);

        let aged = classifier.evaluate_at(
            &scope,
            &ProbeSignals::healthy().with_buffer_fill(0.9),
            start + Duration::from_secs(70),
            wall,
        );
        assert_eq!(aged.reason, HealthReason::BufferFillingUp);
    }

    #[test]
    fn zero_window_tracks_readings_directly() {
        let mut classifier = classifier(0);
        let scope = HealthScope::aggregate(PipelineKind::Traces);
        let now = Instant::now();
        let wall = Utc::now();
        let degraded = classifier.evaluate_at(
            &scope,
            &ProbeSignals::healthy().with_saturation(0.5),
            now,
            wall,
        );
        assert_eq!(degraded.reason, HealthReason::Throttled);
        let healthy = classifier.evaluate_at(&scope, &ProbeSignals::healthy(), now, wall);
        assert_eq!(healthy.reason, HealthReason::Healthy);
    }

    #[test]
    fn retain_pipelines_only_touches_the_given_kind() {
        let mut classifier = classifier(60);
        let now = Instant::now();
        let wall = Utc::now();
        for scope in [
            HealthScope::pipeline(PipelineKind::Logs, "keep"),
            HealthScope::pipeline(PipelineKind::Logs, "drop"),
            HealthScope::aggregate(PipelineKind::Logs),
            HealthScope::pipeline(PipelineKind::Traces, "drop"),
        ] {
            classifier.evaluate_at(&scope, &ProbeSignals::healthy(), now, wall);
        }
        classifier.retain_pipelines(PipelineKind::Logs, |name| name == "keep");
        let scopes: Vec<String> = classifier.snapshot().into_iter().map(|s| s.scope).collect();
        assert_eq!(scopes, vec!["logs", "logs/keep", "traces/drop"]);
    }
}
