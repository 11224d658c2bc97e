//! Collector configuration document, the per-synthesis component registry and
//! the artifact handed to the workload collaborator.

pub mod components;
pub mod document;
pub mod fingerprint;
pub mod registry;

pub use document::{CollectorConfig, Service, ServicePipeline};
pub use fingerprint::{ConfigArtifact, ConfigFingerprint};
pub use registry::{ComponentKind, ComponentRef, ComponentRegistry, RegistryError};
