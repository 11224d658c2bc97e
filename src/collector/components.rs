//! Bodies of the collector components the synthesizer knows how to emit.
//!
//! Every function is pure: equal arguments produce equal bodies, which is what
//! lets the registry deduplicate by id.

use crate::pipeline::{NameSelector, RuntimeResources};
use crate::synthesis::SynthesisOptions;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

pub const MEMORY_LIMITER: &str = "memory_limiter";
pub const BATCH: &str = "batch";
pub const OTLP_RECEIVER: &str = "otlp";
pub const KUBELETSTATS: &str = "kubeletstats";
pub const K8S_CLUSTER: &str = "k8s_cluster";
pub const PROMETHEUS_APP_PODS: &str = "prometheus/app-pods";
pub const PROMETHEUS_APP_SERVICES: &str = "prometheus/app-services";
pub const PROMETHEUS_ISTIO: &str = "prometheus/istio";
pub const FILELOG: &str = "filelog";
pub const DELETE_SERVICE_NAME: &str = "resource/delete-service-name";
pub const INSERT_CLUSTER_NAME: &str = "resource/insert-cluster-name";
pub const K8S_ATTRIBUTES: &str = "k8sattributes";
pub const DROP_NON_PVC_VOLUMES: &str = "filter/drop-non-pvc-volumes-metrics";
pub const INSERT_SKIP_ENRICHMENT: &str = "transform/insert-skip-enrichment-attribute";
pub const ISTIO_NOISE_FILTER: &str = "istio_noise_filter";
pub const DROP_NOISY_SPANS: &str = "filter/drop-noisy-spans";
pub const HEALTH_CHECK: &str = "health_check";
pub const PPROF: &str = "pprof";
pub const FILE_STORAGE: &str = "file_storage";

pub const INSTRUMENTATION_SCOPE_PREFIX: &str = "io.kyma-project.telemetry";
pub const SKIP_ENRICHMENT_ATTRIBUTE: &str = "io.kyma-project.telemetry.skip_enrichment";
pub const LOG_AGENT_NAME: &str = "telemetry-log-agent";
const NAMESPACE_ATTRIBUTE: &str = "resource.attributes[\"k8s.namespace.name\"]";
const CONTRIB_RECEIVER_SCOPE: &str =
    "github.com/open-telemetry/opentelemetry-collector-contrib/receiver";
const POD_LOG_ROOT: &str = "/var/log/pods";

/// Renders a duration the way the collector parses it (`10s`, `250ms`).
pub fn collector_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

pub fn transform_scope_id(tag: &str) -> String {
    format!("transform/set-instrumentation-scope-{tag}")
}

pub fn namespace_filter_id(tag: &str) -> String {
    format!("filter/{tag}-namespaces")
}

pub fn memory_limiter(options: &SynthesisOptions) -> JsonValue {
    json!({
        "check_interval": collector_duration(options.memory_limiter.check_interval),
        "limit_percentage": options.memory_limiter.limit_percentage,
        "spike_limit_percentage": options.memory_limiter.spike_limit_percentage,
    })
}

pub fn batch(options: &SynthesisOptions) -> JsonValue {
    json!({
        "send_batch_size": options.batch.send_batch_size,
        "send_batch_max_size": options.batch.send_batch_max_size,
        "timeout": collector_duration(options.batch.timeout),
    })
}

pub fn otlp_receiver() -> JsonValue {
    json!({
        "protocols": {
            "grpc": { "endpoint": "${env:MY_POD_IP}:4317" },
            "http": { "endpoint": "${env:MY_POD_IP}:4318" },
        }
    })
}

pub fn kubeletstats(resources: &RuntimeResources, options: &SynthesisOptions) -> JsonValue {
    let groups: Vec<&str> = [
        ("container", resources.container),
        ("pod", resources.pod),
        ("node", resources.node),
        ("volume", resources.volume),
    ]
    .into_iter()
    .filter_map(|(group, enabled)| enabled.then_some(group))
    .collect();

    json!({
        "collection_interval": collector_duration(options.scrape_interval),
        "auth_type": "serviceAccount",
        "endpoint": "https://${env:MY_NODE_NAME}:10250",
        "insecure_skip_verify": true,
        "metric_groups": groups,
    })
}

pub fn k8s_cluster(resources: &RuntimeResources, options: &SynthesisOptions) -> JsonValue {
    let toggles = [
        ("k8s.pod.phase", resources.pod),
        ("k8s.container.restarts", resources.container),
        ("k8s.statefulset.current_pods", resources.statefulset),
        ("k8s.statefulset.desired_pods", resources.statefulset),
        ("k8s.daemonset.current_scheduled_nodes", resources.daemonset),
        ("k8s.daemonset.desired_scheduled_nodes", resources.daemonset),
        ("k8s.deployment.available", resources.deployment),
        ("k8s.deployment.desired", resources.deployment),
        ("k8s.job.active_pods", resources.job),
        ("k8s.job.failed_pods", resources.job),
    ];
    let metrics: serde_json::Map<String, JsonValue> = toggles
        .into_iter()
        .map(|(name, enabled)| (name.to_string(), json!({ "enabled": enabled })))
        .collect();

    json!({
        "auth_type": "serviceAccount",
        "collection_interval": collector_duration(options.scrape_interval),
        "node_conditions_to_report": [],
        "metrics": metrics,
    })
}

pub fn prometheus_app_pods(options: &SynthesisOptions) -> JsonValue {
    let mut job = json!({
        "job_name": "app-pods",
        "scrape_interval": collector_duration(options.scrape_interval),
        "sample_limit": 50000,
        "kubernetes_sd_configs": [{
            "role": "pod",
            "selectors": [{ "role": "pod", "field": "spec.nodeName=${env:MY_NODE_NAME}" }],
        }],
        "relabel_configs": [
            {
                "source_labels": ["__meta_kubernetes_pod_annotation_prometheus_io_scrape"],
                "action": "keep",
                "regex": "true",
            },
            {
                "source_labels": ["__meta_kubernetes_pod_phase"],
                "action": "drop",
                "regex": "Pending|Succeeded|Failed",
            },
            {
                "source_labels": ["__meta_kubernetes_pod_annotation_prometheus_io_path"],
                "action": "replace",
                "target_label": "__metrics_path__",
                "regex": "(.+)",
            },
        ],
    });

    if options.istio_enabled {
        let cert_path = options.istio_cert_path.trim_end_matches('/');
        job["tls_config"] = json!({
            "ca_file": format!("{cert_path}/root-cert.pem"),
            "cert_file": format!("{cert_path}/cert-chain.pem"),
            "key_file": format!("{cert_path}/key.pem"),
            "insecure_skip_verify": true,
        });
    }

    json!({ "config": { "scrape_configs": [job] } })
}

pub fn prometheus_app_services(options: &SynthesisOptions) -> JsonValue {
    json!({
        "config": {
            "scrape_configs": [{
                "job_name": "app-services",
                "scrape_interval": collector_duration(options.scrape_interval),
                "sample_limit": 50000,
                "kubernetes_sd_configs": [{ "role": "endpoints" }],
                "relabel_configs": [
                    {
                        "source_labels": ["__meta_kubernetes_service_annotation_prometheus_io_scrape"],
                        "action": "keep",
                        "regex": "true",
                    },
                    {
                        "source_labels": ["__meta_kubernetes_pod_node_name"],
                        "action": "keep",
                        "regex": "${env:MY_NODE_NAME}",
                    },
                ],
            }]
        }
    })
}

pub fn prometheus_istio(envoy_metrics: bool, options: &SynthesisOptions) -> JsonValue {
    let keep = if envoy_metrics {
        "istio_.*|envoy_.*"
    } else {
        "istio_.*"
    };

    json!({
        "config": {
            "scrape_configs": [{
                "job_name": "istio-proxy",
                "scrape_interval": collector_duration(options.scrape_interval),
                "metrics_path": "/stats/prometheus",
                "kubernetes_sd_configs": [{
                    "role": "pod",
                    "selectors": [{ "role": "pod", "field": "spec.nodeName=${env:MY_NODE_NAME}" }],
                }],
                "relabel_configs": [{
                    "source_labels": ["__meta_kubernetes_pod_container_name"],
                    "action": "keep",
                    "regex": "istio-proxy",
                }],
                "metric_relabel_configs": [{
                    "source_labels": ["__name__"],
                    "action": "keep",
                    "regex": keep,
                }],
            }]
        }
    })
}

/// File globs for the merged application log selectors, plus the agent's own
/// pods which are always excluded.
pub fn filelog_globs(
    namespaces: &NameSelector,
    containers: &NameSelector,
    options: &SynthesisOptions,
) -> (Vec<String>, Vec<String>) {
    let namespace_parts: Vec<String> = if namespaces.include.is_empty() {
        vec!["*".to_string()]
    } else {
        namespaces.include.iter().map(|ns| format!("{ns}_*")).collect()
    };
    let container_parts: Vec<&str> = if containers.include.is_empty() {
        vec!["*"]
    } else {
        containers.include.iter().map(String::as_str).collect()
    };

    let mut include = Vec::new();
    for namespace in &namespace_parts {
        for container in &container_parts {
            include.push(format!("{POD_LOG_ROOT}/{namespace}/{container}/*.log"));
        }
    }

    let mut exclude = vec![format!(
        "{POD_LOG_ROOT}/{}_{LOG_AGENT_NAME}*/*/*.log",
        options.self_namespace
    )];
    if namespaces.include.is_empty() {
        exclude.extend(
            namespaces
                .exclude
                .iter()
                .map(|ns| format!("{POD_LOG_ROOT}/{ns}_*/*/*.log")),
        );
    }
    if containers.include.is_empty() {
        exclude.extend(
            containers
                .exclude
                .iter()
                .map(|container| format!("{POD_LOG_ROOT}/*/{container}/*.log")),
        );
    }

    (include, exclude)
}

pub fn filelog(include: &[String], exclude: &[String]) -> JsonValue {
    json!({
        "include": include,
        "exclude": exclude,
        "include_file_path": true,
        "include_file_name": false,
        "start_at": "beginning",
        "storage": FILE_STORAGE,
        "retry_on_failure": { "enabled": true },
        "operators": [{
            "id": "containerd-parser",
            "type": "container",
            "add_metadata_from_file_path": true,
        }],
    })
}

pub fn delete_service_name() -> JsonValue {
    json!({ "attributes": [{ "action": "delete", "key": "service.name" }] })
}

pub fn insert_cluster_name(options: &SynthesisOptions) -> JsonValue {
    json!({
        "attributes": [{
            "action": "insert",
            "key": "k8s.cluster.name",
            "value": options.cluster_name,
        }]
    })
}

pub fn k8s_attributes() -> JsonValue {
    json!({
        "auth_type": "serviceAccount",
        "passthrough": false,
        "extract": {
            "metadata": [
                "k8s.pod.name",
                "k8s.node.name",
                "k8s.namespace.name",
                "k8s.deployment.name",
                "k8s.statefulset.name",
                "k8s.daemonset.name",
                "k8s.cronjob.name",
                "k8s.job.name",
            ],
            "labels": [{
                "from": "pod",
                "key": "app.kubernetes.io/name",
                "tag_name": "kyma.kubernetes_io_app_name",
            }],
        },
        "pod_association": [
            { "sources": [{ "from": "resource_attribute", "name": "k8s.pod.ip" }] },
            { "sources": [{ "from": "resource_attribute", "name": "k8s.pod.uid" }] },
            { "sources": [{ "from": "connection" }] },
        ],
    })
}

/// Signal flavour of a transform or filter processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalContext {
    Metrics,
    Logs,
}

/// Rewrites receiver-native scope names to `<prefix>/<tag>` and stamps the
/// manager version.
pub fn set_instrumentation_scope(
    signal: SignalContext,
    tag: &str,
    receivers: &[&str],
    options: &SynthesisOptions,
) -> JsonValue {
    let scope_name = format!("{INSTRUMENTATION_SCOPE_PREFIX}/{tag}");
    let mut statements = Vec::new();
    for receiver in receivers {
        let native = format!("{CONTRIB_RECEIVER_SCOPE}/{receiver}");
        statements.push(format!(
            "set(version, \"{}\") where name == \"{native}\"",
            options.instrumentation_scope_version
        ));
        statements.push(format!("set(name, \"{scope_name}\") where name == \"{native}\""));
    }

    let key = match signal {
        SignalContext::Metrics => "metric_statements",
        SignalContext::Logs => "log_statements",
    };
    let mut body = serde_json::Map::new();
    body.insert("error_mode".to_string(), json!("ignore"));
    body.insert(
        key.to_string(),
        json!([{ "context": "scope", "statements": statements }]),
    );
    JsonValue::Object(body)
}

pub fn insert_skip_enrichment() -> JsonValue {
    let statements: Vec<String> = ["node", "statefulset", "daemonset", "deployment", "job"]
        .iter()
        .map(|resource| {
            format!(
                "set(resource.attributes[\"{SKIP_ENRICHMENT_ATTRIBUTE}\"], \"true\") where IsMatch(name, \"^k8s.{resource}.*\")"
            )
        })
        .collect();

    json!({
        "error_mode": "ignore",
        "metric_statements": [{ "context": "metric", "statements": statements }],
    })
}

pub fn drop_non_pvc_volumes() -> JsonValue {
    json!({
        "metrics": {
            "metric": [
                "resource.attributes[\"k8s.volume.name\"] != nil and resource.attributes[\"k8s.volume.type\"] != \"persistentVolumeClaim\"",
            ]
        }
    })
}

pub fn istio_noise_filter() -> JsonValue {
    json!({})
}

/// Drops data whose namespace the merged selector rejects. Callers must not
/// request a filter for an unrestricted selector.
pub fn namespace_filter(signal: SignalContext, selector: &NameSelector) -> JsonValue {
    let conditions: Vec<String> = if !selector.include.is_empty() {
        vec![format!(
            "{NAMESPACE_ATTRIBUTE} != nil and not IsMatch({NAMESPACE_ATTRIBUTE}, \"^({})$\")",
            selector.include.join("|")
        )]
    } else {
        vec![format!(
            "IsMatch({NAMESPACE_ATTRIBUTE}, \"^({})$\")",
            selector.exclude.join("|")
        )]
    };

    match signal {
        SignalContext::Metrics => json!({ "metrics": { "metric": conditions } }),
        SignalContext::Logs => json!({ "logs": { "log_record": conditions } }),
    }
}

pub fn drop_noisy_spans(options: &SynthesisOptions) -> JsonValue {
    json!({
        "traces": {
            "span": [
                "attributes[\"http.method\"] == \"GET\" and IsMatch(attributes[\"http.url\"], \".+/healthz$\")",
                format!(
                    "resource.attributes[\"k8s.namespace.name\"] == \"{}\" and IsMatch(attributes[\"http.url\"], \".+/v1/(traces|metrics|logs)$\")",
                    options.self_namespace
                ),
            ]
        }
    })
}

pub fn health_check() -> JsonValue {
    json!({ "endpoint": "${env:MY_POD_IP}:13133" })
}

pub fn pprof() -> JsonValue {
    json!({ "endpoint": "127.0.0.1:1777" })
}

pub fn file_storage() -> JsonValue {
    json!({ "directory": format!("/var/lib/{LOG_AGENT_NAME}/file-log-receiver") })
}

pub fn service_telemetry(options: &SynthesisOptions) -> JsonValue {
    json!({
        "logs": { "level": options.self_log_level, "encoding": "json" },
        "metrics": {
            "readers": [{
                "pull": {
                    "exporter": {
                        "prometheus": { "host": "${MY_POD_IP}", "port": options.metrics_port }
                    }
                }
            }]
        }
    })
}
