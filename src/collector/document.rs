use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// The rendered collector document. All maps are ordered so that rendering
/// is byte-stable for equal content.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub receivers: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub processors: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub exporters: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub extensions: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub service: Service,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub pipelines: BTreeMap<String, ServicePipeline>,
    #[serde(default)]
    pub telemetry: JsonValue,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePipeline {
    pub receivers: Vec<String>,
    pub processors: Vec<String>,
    pub exporters: Vec<String>,
}

impl CollectorConfig {
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn from_yaml(input: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(input)
    }

    pub fn pipeline(&self, name: &str) -> Option<&ServicePipeline> {
        self.service.pipelines.get(name)
    }

    pub fn pipeline_names(&self) -> Vec<&str> {
        self.service.pipelines.keys().map(String::as_str).collect()
    }

    /// Every id referenced from `service` that has no definition, formatted as
    /// `<pipeline>: <kind> <id>`.
    pub fn dangling_references(&self) -> Vec<String> {
        let mut missing = Vec::new();

        for extension in &self.service.extensions {
            if !self.extensions.contains_key(extension) {
                missing.push(format!("service: extension {extension}"));
            }
        }

        for (name, pipeline) in &self.service.pipelines {
            let groups = [
                ("receiver", &pipeline.receivers, &self.receivers),
                ("processor", &pipeline.processors, &self.processors),
                ("exporter", &pipeline.exporters, &self.exporters),
            ];
            for (kind, ids, defined) in groups {
                for id in ids {
                    if !defined.contains_key(id) {
                        missing.push(format!("{name}: {kind} {id}"));
                    }
                }
            }
        }

        missing
    }
}
