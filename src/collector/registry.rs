use super::document::{CollectorConfig, Service};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Receiver,
    Processor,
    Exporter,
    Extension,
}

impl ComponentKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Receiver => "receiver",
            Self::Processor => "processor",
            Self::Exporter => "exporter",
            Self::Extension => "extension",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a registered component, used to build service pipelines.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentRef {
    kind: ComponentKind,
    id: String,
}

impl ComponentRef {
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn into_id(self) -> String {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("{kind} `{id}` registered twice with different bodies (existing {existing}, requested {requested})")]
    InconsistentComponent {
        kind: ComponentKind,
        id: String,
        existing: JsonValue,
        requested: JsonValue,
    },
    #[error("{kind} id must not be empty")]
    EmptyId { kind: ComponentKind },
}

/// Deduplicating builder of named configuration fragments.
///
/// Lives for exactly one synthesis call. Requesting an id twice with an equal
/// body returns the existing handle; a differing body is a programming error
/// surfaced as [`RegistryError::InconsistentComponent`].
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    receivers: BTreeMap<String, JsonValue>,
    processors: BTreeMap<String, JsonValue>,
    exporters: BTreeMap<String, JsonValue>,
    extensions: BTreeMap<String, JsonValue>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure(
        &mut self,
        id: impl Into<String>,
        kind: ComponentKind,
        body: JsonValue,
    ) -> Result<ComponentRef, RegistryError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(RegistryError::EmptyId { kind });
        }

        let entries = self.entries_mut(kind);
        match entries.get(&id) {
            Some(existing) if *existing == body => {}
            Some(existing) => {
                return Err(RegistryError::InconsistentComponent {
                    kind,
                    existing: existing.clone(),
                    requested: body,
                    id,
                });
            }
            None => {
                entries.insert(id.clone(), body);
            }
        }

        Ok(ComponentRef { kind, id })
    }

    pub fn receiver(
        &mut self,
        id: impl Into<String>,
        body: JsonValue,
    ) -> Result<ComponentRef, RegistryError> {
        self.ensure(id, ComponentKind::Receiver, body)
    }

    pub fn processor(
        &mut self,
        id: impl Into<String>,
        body: JsonValue,
    ) -> Result<ComponentRef, RegistryError> {
        self.ensure(id, ComponentKind::Processor, body)
    }

    pub fn exporter(
        &mut self,
        id: impl Into<String>,
        body: JsonValue,
    ) -> Result<ComponentRef, RegistryError> {
        self.ensure(id, ComponentKind::Exporter, body)
    }

    pub fn extension(
        &mut self,
        id: impl Into<String>,
        body: JsonValue,
    ) -> Result<ComponentRef, RegistryError> {
        self.ensure(id, ComponentKind::Extension, body)
    }

    pub fn contains(&self, kind: ComponentKind, id: &str) -> bool {
        self.entries(kind).contains_key(id)
    }

    pub fn len(&self, kind: ComponentKind) -> usize {
        self.entries(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
            && self.processors.is_empty()
            && self.exporters.is_empty()
            && self.extensions.is_empty()
    }

    /// Consumes the registry into a document with the given service section.
    pub fn into_config(self, service: Service) -> CollectorConfig {
        CollectorConfig {
            receivers: self.receivers,
            processors: self.processors,
            exporters: self.exporters,
            extensions: self.extensions,
            service,
        }
    }

    fn entries(&self, kind: ComponentKind) -> &BTreeMap<String, JsonValue> {
        match kind {
            ComponentKind::Receiver => &self.receivers,
            ComponentKind::Processor => &self.processors,
            ComponentKind::Exporter => &self.exporters,
            ComponentKind::Extension => &self.extensions,
        }
    }

    fn entries_mut(&mut self, kind: ComponentKind) -> &mut BTreeMap<String, JsonValue> {
        match kind {
            ComponentKind::Receiver => &mut self.receivers,
            ComponentKind::Processor => &mut self.processors,
            ComponentKind::Exporter => &mut self.exporters,
            ComponentKind::Extension => &mut self.extensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equal_repeat_returns_the_same_handle() {
        let mut registry = ComponentRegistry::new();
        let first = registry
            .processor("batch", json!({ "send_batch_size": 1024 }))
            .expect("first");
        let second = registry
            .processor("batch", json!({ "send_batch_size": 1024 }))
            .expect("repeat");

        assert_eq!(first, second);
        assert_eq!(registry.len(ComponentKind::Processor), 1);
        assert!(registry.contains(ComponentKind::Processor, "batch"));
        assert!(!registry.contains(ComponentKind::Exporter, "batch"));
    }

    #[test]
    fn differing_body_is_rejected() {
        let mut registry = ComponentRegistry::new();
        registry
            .processor("batch", json!({ "send_batch_size": 1024 }))
            .expect("first");

        let err = registry
            .processor("batch", json!({ "send_batch_size": 512 }))
            .expect_err("collision");
        assert!(matches!(
            err,
            RegistryError::InconsistentComponent {
                kind: ComponentKind::Processor,
                ref id,
                ..
            } if id == "batch"
        ));
        assert_eq!(registry.len(ComponentKind::Processor), 1);
    }

    #[test]
    fn kinds_have_separate_namespaces() {
        let mut registry = ComponentRegistry::new();
        registry.receiver("otlp", json!({ "protocols": {} })).expect("receiver");
        registry
            .exporter("otlp", json!({ "endpoint": "https://backend:4317" }))
            .expect("exporter");
        assert!(matches!(
            registry.extension(" ", JsonValue::Null),
            Err(RegistryError::EmptyId {
                kind: ComponentKind::Extension
            })
        ));

        let config = registry.into_config(Service::default());
        assert_eq!(config.receivers.len(), 1);
        assert_eq!(config.exporters.len(), 1);
        assert!(config.processors.is_empty());
    }
}
