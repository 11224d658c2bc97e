pub mod manifest;

use crate::health::HealthThresholds;
use crate::pipeline::PipelineKind;
use crate::retry::{JitterMode, RetrySettings};
use crate::synthesis::{BatchOptions, MemoryLimiterOptions, SynthesisOptions};
use crate::workload::WorkloadParams;
use config::{Config, ConfigError, Environment, File};
use humantime::parse_duration;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_CONFIG_FILE: &str = "config/manager";
const ENV_PREFIX: &str = "TELEMETRY";
const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Raw configuration as read from file and environment. Durations stay
/// strings until [`ManagerConfig::resolve`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub collector: CollectorSection,
    #[serde(default)]
    pub reconcile: ReconcileSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub logs: KindSection,
    #[serde(default)]
    pub metrics: KindSection,
    #[serde(default)]
    pub traces: KindSection,
    #[serde(default)]
    pub management: ManagementSection,
    #[serde(default)]
    pub standalone: StandaloneSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorSection {
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub istio_enabled: bool,
    #[serde(default)]
    pub istio_cert_path: Option<String>,
    #[serde(default)]
    pub instrumentation_scope_version: Option<String>,
    #[serde(default)]
    pub self_log_level: Option<String>,
    #[serde(default)]
    pub scrape_interval: Option<String>,
    #[serde(default)]
    pub sending_queue_size: Option<u32>,
    #[serde(default)]
    pub memory_check_interval: Option<String>,
    #[serde(default)]
    pub memory_limit_percentage: Option<u32>,
    #[serde(default)]
    pub memory_spike_limit_percentage: Option<u32>,
    #[serde(default)]
    pub batch_send_size: Option<u32>,
    #[serde(default)]
    pub batch_max_size: Option<u32>,
    #[serde(default)]
    pub batch_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconcileSection {
    #[serde(default)]
    pub resync_interval: Option<String>,
    #[serde(default)]
    pub retry_initial: Option<String>,
    #[serde(default)]
    pub retry_max: Option<String>,
    #[serde(default)]
    pub retry_multiplier: Option<f64>,
    #[serde(default)]
    pub retry_jitter: Option<JitterMode>,
    #[serde(default)]
    pub apply_timeout: Option<String>,
    #[serde(default)]
    pub status_write_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthSection {
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub buffer_filling_up: Option<f64>,
    #[serde(default)]
    pub all_data_dropped: Option<f64>,
    #[serde(default)]
    pub some_data_dropped: Option<f64>,
    #[serde(default)]
    pub throttling: Option<f64>,
    #[serde(default)]
    pub prometheus_url: Option<String>,
    #[serde(default)]
    pub probe_timeout: Option<String>,
    #[serde(default)]
    pub rate_window: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KindSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `0` disables the limit.
    #[serde(default)]
    pub max_pipelines: Option<usize>,
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub allowed_ports: Option<Vec<u16>>,
    #[serde(default)]
    pub priority_class: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for KindSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pipelines: None,
            replicas: None,
            allowed_ports: None,
            priority_class: None,
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagementSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ManagementSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StandaloneSection {
    #[serde(default)]
    pub pipelines_dir: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub sync_interval: Option<String>,
}

const fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("{}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl SettingsError {
    pub fn problems(&self) -> &[String] {
        match self {
            Self::Invalid(problems) => problems,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileSettings {
    pub resync_interval: Duration,
    pub retry: RetrySettings,
    pub apply_timeout: Duration,
    pub status_write_attempts: u32,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            retry: RetrySettings::default(),
            apply_timeout: Duration::from_secs(30),
            status_write_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthSettings {
    pub window: Duration,
    pub thresholds: HealthThresholds,
    pub prometheus_url: Option<Url>,
    pub probe_timeout: Duration,
    pub rate_window: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            thresholds: HealthThresholds::default(),
            prometheus_url: None,
            probe_timeout: Duration::from_secs(5),
            rate_window: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindSettings {
    pub enabled: bool,
    pub max_pipelines: Option<usize>,
    pub workload: WorkloadParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandaloneSettings {
    pub pipelines_dir: PathBuf,
    pub output_dir: PathBuf,
    pub sync_interval: Duration,
}

/// Typed settings the runtime is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    pub synthesis: SynthesisOptions,
    pub reconcile: ReconcileSettings,
    pub health: HealthSettings,
    pub kinds: BTreeMap<PipelineKind, KindSettings>,
    pub management: ManagementSettings,
    pub standalone: StandaloneSettings,
}

impl ManagerSettings {
    pub fn kind(&self, kind: PipelineKind) -> Option<&KindSettings> {
        self.kinds.get(&kind)
    }

    pub fn enabled_kinds(&self) -> Vec<PipelineKind> {
        self.kinds
            .iter()
            .filter(|(_, settings)| settings.enabled)
            .map(|(kind, _)| *kind)
            .collect()
    }
}

/// Default per-kind pipeline limits.
pub const fn default_max_pipelines(kind: PipelineKind) -> usize {
    match kind {
        PipelineKind::Logs => 5,
        PipelineKind::Metrics | PipelineKind::Traces => 3,
    }
}

impl ManagerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Reads `path` (required) or the optional default file, then applies
    /// `TELEMETRY__SECTION__KEY` environment overrides.
    pub fn load_from(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Validates every section and collects all problems into one error.
    pub fn resolve(&self) -> Result<ManagerSettings, SettingsError> {
        let mut problems = Vec::new();

        let synthesis = self.resolve_synthesis(&mut problems);
        let reconcile = self.resolve_reconcile(&mut problems);
        let health = self.resolve_health(&mut problems);

        let mut kinds = BTreeMap::new();
        for kind in PipelineKind::ALL {
            let section = self.kind_section(kind);
            kinds.insert(
                kind,
                resolve_kind(
                    kind,
                    section,
                    self.collector.image.as_deref(),
                    &synthesis,
                    &mut problems,
                ),
            );
        }

        if self.management.host.trim().is_empty() {
            problems.push("management.host must not be empty".to_string());
        }

        let standalone = StandaloneSettings {
            pipelines_dir: PathBuf::from(
                self.standalone
                    .pipelines_dir
                    .as_deref()
                    .unwrap_or("pipelines"),
            ),
            output_dir: PathBuf::from(self.standalone.output_dir.as_deref().unwrap_or("out")),
            sync_interval: duration(
                "standalone.sync_interval",
                self.standalone.sync_interval.as_deref(),
                Duration::from_secs(10),
                &mut problems,
            ),
        };

        if !problems.is_empty() {
            return Err(SettingsError::Invalid(problems));
        }

        Ok(ManagerSettings {
            synthesis,
            reconcile,
            health,
            kinds,
            management: ManagementSettings {
                enabled: self.management.enabled,
                host: self.management.host.clone(),
                port: self.management.port,
            },
            standalone,
        })
    }

    pub fn kind_section(&self, kind: PipelineKind) -> &KindSection {
        match kind {
            PipelineKind::Logs => &self.logs,
            PipelineKind::Metrics => &self.metrics,
            PipelineKind::Traces => &self.traces,
        }
    }

    fn resolve_synthesis(&self, problems: &mut Vec<String>) -> SynthesisOptions {
        let section = &self.collector;
        let defaults = SynthesisOptions::default();
        let memory_defaults = MemoryLimiterOptions::default();
        let batch_defaults = BatchOptions::default();

        let self_log_level = section
            .self_log_level
            .clone()
            .unwrap_or(defaults.self_log_level);
        if !LOG_LEVELS.contains(&self_log_level.as_str()) {
            problems.push(format!(
                "collector.self_log_level must be one of {}, got `{self_log_level}`",
                LOG_LEVELS.join("|")
            ));
        }

        let memory_limiter = MemoryLimiterOptions {
            check_interval: duration(
                "collector.memory_check_interval",
                section.memory_check_interval.as_deref(),
                memory_defaults.check_interval,
                problems,
            ),
            limit_percentage: section
                .memory_limit_percentage
                .unwrap_or(memory_defaults.limit_percentage),
            spike_limit_percentage: section
                .memory_spike_limit_percentage
                .unwrap_or(memory_defaults.spike_limit_percentage),
        };
        if memory_limiter.limit_percentage == 0 || memory_limiter.limit_percentage > 100 {
            problems.push("collector.memory_limit_percentage must be within 1..=100".to_string());
        }
        if memory_limiter.spike_limit_percentage >= memory_limiter.limit_percentage {
            problems.push(
                "collector.memory_spike_limit_percentage must be below memory_limit_percentage"
                    .to_string(),
            );
        }

        let batch = BatchOptions {
            send_batch_size: section
                .batch_send_size
                .unwrap_or(batch_defaults.send_batch_size),
            send_batch_max_size: section
                .batch_max_size
                .unwrap_or(batch_defaults.send_batch_max_size),
            timeout: duration(
                "collector.batch_timeout",
                section.batch_timeout.as_deref(),
                batch_defaults.timeout,
                problems,
            ),
        };
        if batch.send_batch_max_size < batch.send_batch_size {
            problems.push("collector.batch_max_size must be >= batch_send_size".to_string());
        }

        SynthesisOptions {
            cluster_name: section.cluster_name.clone().unwrap_or(defaults.cluster_name),
            self_namespace: section.namespace.clone().unwrap_or(defaults.self_namespace),
            instrumentation_scope_version: section
                .instrumentation_scope_version
                .clone()
                .unwrap_or(defaults.instrumentation_scope_version),
            istio_enabled: section.istio_enabled,
            istio_cert_path: section
                .istio_cert_path
                .clone()
                .unwrap_or(defaults.istio_cert_path),
            self_log_level,
            metrics_port: defaults.metrics_port,
            scrape_interval: duration(
                "collector.scrape_interval",
                section.scrape_interval.as_deref(),
                defaults.scrape_interval,
                problems,
            ),
            sending_queue_size: section
                .sending_queue_size
                .unwrap_or(defaults.sending_queue_size),
            memory_limiter,
            batch,
        }
    }

    fn resolve_reconcile(&self, problems: &mut Vec<String>) -> ReconcileSettings {
        let section = &self.reconcile;
        let defaults = ReconcileSettings::default();

        let multiplier = section
            .retry_multiplier
            .unwrap_or(defaults.retry.multiplier());
        if multiplier.is_nan() || multiplier < 1.0 {
            problems.push(format!(
                "reconcile.retry_multiplier must be >= 1.0, got {multiplier}"
            ));
        }
        let status_write_attempts = section
            .status_write_attempts
            .unwrap_or(defaults.status_write_attempts);
        if status_write_attempts == 0 {
            problems.push("reconcile.status_write_attempts must be at least 1".to_string());
        }

        let retry = RetrySettings::new(
            duration(
                "reconcile.retry_initial",
                section.retry_initial.as_deref(),
                defaults.retry.initial(),
                problems,
            ),
            duration(
                "reconcile.retry_max",
                section.retry_max.as_deref(),
                defaults.retry.max(),
                problems,
            ),
            multiplier,
        )
        .with_jitter(section.retry_jitter.unwrap_or_default());

        ReconcileSettings {
            resync_interval: positive_duration(
                "reconcile.resync_interval",
                section.resync_interval.as_deref(),
                defaults.resync_interval,
                problems,
            ),
            retry,
            apply_timeout: positive_duration(
                "reconcile.apply_timeout",
                section.apply_timeout.as_deref(),
                defaults.apply_timeout,
                problems,
            ),
            status_write_attempts,
        }
    }

    fn resolve_health(&self, problems: &mut Vec<String>) -> HealthSettings {
        let section = &self.health;
        let defaults = HealthSettings::default();
        let threshold_defaults = &defaults.thresholds;

        let thresholds = HealthThresholds {
            buffer_filling_up: ratio(
                "health.buffer_filling_up",
                section.buffer_filling_up,
                threshold_defaults.buffer_filling_up,
                problems,
            ),
            all_data_dropped: ratio(
                "health.all_data_dropped",
                section.all_data_dropped,
                threshold_defaults.all_data_dropped,
                problems,
            ),
            some_data_dropped: ratio(
                "health.some_data_dropped",
                section.some_data_dropped,
                threshold_defaults.some_data_dropped,
                problems,
            ),
            throttling: ratio(
                "health.throttling",
                section.throttling,
                threshold_defaults.throttling,
                problems,
            ),
        };
        if thresholds.some_data_dropped >= thresholds.all_data_dropped {
            problems.push("health.some_data_dropped must be below all_data_dropped".to_string());
        }

        let prometheus_url = section.prometheus_url.as_deref().and_then(|raw| {
            match Url::parse(raw) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
                Ok(_) => {
                    problems.push(format!("health.prometheus_url `{raw}` must be http(s)"));
                    None
                }
                Err(err) => {
                    problems.push(format!("health.prometheus_url `{raw}` is invalid: {err}"));
                    None
                }
            }
        });

        HealthSettings {
            window: duration(
                "health.window",
                section.window.as_deref(),
                defaults.window,
                problems,
            ),
            thresholds,
            prometheus_url,
            probe_timeout: positive_duration(
                "health.probe_timeout",
                section.probe_timeout.as_deref(),
                defaults.probe_timeout,
                problems,
            ),
            rate_window: positive_duration(
                "health.rate_window",
                section.rate_window.as_deref(),
                defaults.rate_window,
                problems,
            ),
        }
    }
}

fn resolve_kind(
    kind: PipelineKind,
    section: &KindSection,
    image: Option<&str>,
    synthesis: &SynthesisOptions,
    problems: &mut Vec<String>,
) -> KindSettings {
    let defaults = WorkloadParams::default();
    let replicas = section.replicas.unwrap_or(defaults.replicas);
    if replicas == 0 {
        problems.push(format!("{kind}.replicas must be at least 1"));
    }
    let max_pipelines = match section.max_pipelines {
        Some(0) => None,
        Some(limit) => Some(limit),
        None => Some(default_max_pipelines(kind)),
    };
    for name in section.env.keys() {
        if name.is_empty() || name.contains('=') {
            problems.push(format!("{kind}.env has invalid variable name `{name}`"));
        }
    }

    KindSettings {
        enabled: section.enabled,
        max_pipelines,
        workload: WorkloadParams {
            namespace: synthesis.self_namespace.clone(),
            image: image.map_or(defaults.image, str::to_string),
            replicas,
            allowed_ports: section
                .allowed_ports
                .clone()
                .unwrap_or(defaults.allowed_ports),
            priority_class: section.priority_class.clone(),
            env: section.env.clone(),
        },
    }
}

fn duration(
    key: &str,
    raw: Option<&str>,
    default: Duration,
    problems: &mut Vec<String>,
) -> Duration {
    match raw {
        None => default,
        Some(value) => parse_duration(value.trim()).unwrap_or_else(|err| {
            problems.push(format!("{key}: invalid duration `{value}`: {err}"));
            default
        }),
    }
}

fn positive_duration(
    key: &str,
    raw: Option<&str>,
    default: Duration,
    problems: &mut Vec<String>,
) -> Duration {
    let value = duration(key, raw, default, problems);
    if value.is_zero() {
        problems.push(format!("{key} must be greater than zero"));
    }
    value
}

fn ratio(key: &str, raw: Option<f64>, default: f64, problems: &mut Vec<String>) -> f64 {
    let value = raw.unwrap_or(default);
    if !(0.0..=1.0).contains(&value) {
        problems.push(format!("{key} must be within 0.0..=1.0, got {value}"));
    }
    value
}
