use std::fs;
use std::sync::Arc;
use std::time::Duration;
use telemetry_manager::app::ManifestSync;
use telemetry_manager::config::manifest::{load_dir, sync_into, ManifestError};
use telemetry_manager::config::ManagerConfig;
use telemetry_manager::pipeline::{OtlpProtocol, PipelineKind};
use telemetry_manager::retry::JitterMode;
use telemetry_manager::store::{MemoryObjectStore, ObjectStore};
use tempfile::TempDir;

const MANAGER_YAML: &str = r#"
collector:
  cluster_name: shoot-eu-1
  namespace: telemetry-system
  image: otel/opentelemetry-collector-contrib:0.114.0
  scrape_interval: 15s
reconcile:
  resync_interval: 2m
  retry_initial: 500ms
  retry_max: 1m
  retry_jitter: full
  apply_timeout: 20s
health:
  window: 90s
  buffer_filling_up: 0.7
  prometheus_url: http://prometheus:9090
logs:
  enabled: false
metrics:
  max_pipelines: 0
  replicas: 2
traces:
  max_pipelines: 2
  priority_class: telemetry-priority
management:
  port: 9443
standalone:
  pipelines_dir: /etc/pipelines
  sync_interval: 5s
"#;

const PIPELINES: &str = r#"
apiVersion: telemetry.kyma-project.io/v1alpha1
kind: TracePipeline
metadata:
  name: jaeger
spec:
  output:
    otlp:
      endpoint: http://jaeger:4317
---
apiVersion: telemetry.kyma-project.io/v1alpha1
kind: MetricPipeline
metadata:
  name: runtime
  labels:
    team: platform
spec:
  input:
    runtime:
      enabled: true
      namespaces:
        exclude: [kube-system]
  output:
    otlp:
      endpoint: https://metrics.example:4318
      protocol: http
"#;

fn write(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).expect("write fixture");
}

#[test]
fn file_settings_resolve_into_runtime_settings() {
    let dir = TempDir::new().expect("tempdir");
    write(&dir, "manager.yaml", MANAGER_YAML);
    let path = dir.path().join("manager.yaml");

    let config = ManagerConfig::load_from(path.to_str()).expect("load");
    let settings = config.resolve().expect("resolve");

    assert_eq!(settings.synthesis.cluster_name, "shoot-eu-1");
    assert_eq!(settings.synthesis.scrape_interval, Duration::from_secs(15));
    assert_eq!(settings.reconcile.resync_interval, Duration::from_secs(120));
    assert_eq!(settings.reconcile.apply_timeout, Duration::from_secs(20));
    assert_eq!(settings.reconcile.retry.initial(), Duration::from_millis(500));
    assert_eq!(settings.reconcile.retry.jitter(), JitterMode::Full);
    assert_eq!(settings.health.window, Duration::from_secs(90));
    assert_eq!(settings.health.thresholds.buffer_filling_up, 0.7);
    assert_eq!(
        settings.health.prometheus_url.as_ref().map(|url| url.as_str()),
        Some("http://prometheus:9090/")
    );

    assert_eq!(
        settings.enabled_kinds(),
        vec![PipelineKind::Metrics, PipelineKind::Traces]
    );
    let metrics = settings.kind(PipelineKind::Metrics).expect("metrics");
    assert_eq!(metrics.max_pipelines, None);
    assert_eq!(metrics.workload.replicas, 2);
    assert_eq!(metrics.workload.namespace, "telemetry-system");
    assert_eq!(
        metrics.workload.image,
        "otel/opentelemetry-collector-contrib:0.114.0"
    );
    let traces = settings.kind(PipelineKind::Traces).expect("traces");
    assert_eq!(traces.max_pipelines, Some(2));
    assert_eq!(
        traces.workload.priority_class.as_deref(),
        Some("telemetry-priority")
    );

    assert_eq!(settings.management.port, 9443);
    assert_eq!(settings.standalone.pipelines_dir.to_str(), Some("/etc/pipelines"));
    assert_eq!(settings.standalone.sync_interval, Duration::from_secs(5));
}

#[test]
fn missing_explicit_config_file_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("absent.yaml");
    assert!(ManagerConfig::load_from(path.to_str()).is_err());
}

#[test]
fn manifest_directory_loads_every_document() {
    let dir = TempDir::new().expect("tempdir");
    write(&dir, "pipelines.yaml", PIPELINES);
    write(&dir, "README.md", "not a manifest");

    let pipelines = load_dir(dir.path()).expect("load manifests");
    assert_eq!(pipelines.len(), 2);

    let runtime = pipelines
        .iter()
        .find(|pipeline| pipeline.name() == "runtime")
        .expect("runtime pipeline");
    assert_eq!(runtime.kind(), PipelineKind::Metrics);
    assert_eq!(
        runtime.metadata.labels.get("team").map(String::as_str),
        Some("platform")
    );
    let spec = runtime.metric().expect("metric spec");
    assert!(spec.input.runtime_enabled());
    let output = spec
        .output
        .as_ref()
        .and_then(|output| output.otlp.as_ref())
        .expect("otlp output");
    assert_eq!(output.protocol, OtlpProtocol::Http);
}

#[test]
fn manifest_problems_are_collected_across_files() {
    let dir = TempDir::new().expect("tempdir");
    write(
        &dir,
        "a.yaml",
        "apiVersion: telemetry.kyma-project.io/v2\nkind: TracePipeline\nmetadata:\n  name: a\n",
    );
    write(
        &dir,
        "b.yml",
        "kind: ProfilePipeline\nmetadata:\n  name: b\n",
    );

    let err = load_dir(dir.path()).expect_err("invalid manifests");
    let ManifestError::Invalid(problems) = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(problems.len(), 2, "{problems:?}");
    assert!(problems[0].contains("unsupported apiVersion"));
    assert!(problems[1].contains("unsupported kind `ProfilePipeline`"));
}

#[test]
fn duplicate_pipelines_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    write(&dir, "one.yaml", PIPELINES);
    write(&dir, "two.yaml", PIPELINES);

    assert!(matches!(
        load_dir(dir.path()),
        Err(ManifestError::Invalid(_))
    ));
}

#[tokio::test]
async fn sync_creates_updates_and_deletes() {
    let store = MemoryObjectStore::new();
    let kinds = PipelineKind::ALL.to_vec();
    let dir = TempDir::new().expect("tempdir");
    write(&dir, "pipelines.yaml", PIPELINES);

    let report = sync_into(&store, &kinds, load_dir(dir.path()).expect("load"))
        .await
        .expect("sync");
    assert_eq!(report.created, vec!["metrics/runtime", "traces/jaeger"]);
    assert!(report.updated.is_empty() && report.deleted.is_empty());

    let report = sync_into(&store, &kinds, load_dir(dir.path()).expect("load"))
        .await
        .expect("resync");
    assert!(report.is_empty());

    let changed = PIPELINES.replace("http://jaeger:4317", "http://tempo:4317");
    write(&dir, "pipelines.yaml", &changed);
    let report = sync_into(&store, &kinds, load_dir(dir.path()).expect("load"))
        .await
        .expect("sync change");
    assert_eq!(report.updated, vec!["traces/jaeger"]);
    let jaeger = store.get(PipelineKind::Traces, "jaeger").await.expect("get");
    assert_eq!(jaeger.metadata.generation, 2);

    let trace_only = changed
        .split("---")
        .next()
        .expect("first document")
        .to_string();
    write(&dir, "pipelines.yaml", &trace_only);
    let report = sync_into(&store, &kinds, load_dir(dir.path()).expect("load"))
        .await
        .expect("sync removal");
    assert_eq!(report.deleted, vec!["metrics/runtime"]);
    assert!(store.snapshot(PipelineKind::Metrics, "runtime").is_none());
}

#[tokio::test]
async fn manifest_sync_leaves_the_store_alone_on_bad_input() {
    let store = MemoryObjectStore::new();
    let dir = TempDir::new().expect("tempdir");
    write(&dir, "pipelines.yaml", PIPELINES);

    let shared: Arc<dyn ObjectStore> = Arc::new(store.clone());
    let sync = ManifestSync::new(
        shared,
        dir.path(),
        vec![PipelineKind::Traces],
        Duration::from_secs(10),
    );
    sync.sync_once().await.expect("first sync");
    assert!(store.snapshot(PipelineKind::Traces, "jaeger").is_some());
    assert!(store.snapshot(PipelineKind::Metrics, "runtime").is_none());

    write(&dir, "pipelines.yaml", "kind: [broken");
    assert!(sync.sync_once().await.is_err());
    assert!(store.snapshot(PipelineKind::Traces, "jaeger").is_some());
}
