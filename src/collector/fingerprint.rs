use super::document::CollectorConfig;
use crate::pipeline::PipelineKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Content hash of a rendered document plus its environment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigFingerprint(String);

impl ConfigFingerprint {
    pub fn compute(yaml: &str, env: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        for (key, value) in env {
            hasher.update(b"\0");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the workload collaborator needs to run one collector kind.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigArtifact {
    pub kind: PipelineKind,
    pub yaml: String,
    pub env: BTreeMap<String, String>,
    pub fingerprint: ConfigFingerprint,
}

impl ConfigArtifact {
    pub fn render(
        kind: PipelineKind,
        config: &CollectorConfig,
        env: BTreeMap<String, String>,
    ) -> Result<Self, serde_yaml::Error> {
        let yaml = config.to_yaml()?;
        let fingerprint = ConfigFingerprint::compute(&yaml, &env);
        Ok(Self {
            kind,
            yaml,
            env,
            fingerprint,
        })
    }
}

/// Lowercase hex SHA-256 of `input`, truncated to `len` characters.
pub fn short_digest(input: &[u8], len: usize) -> String {
    let digest = format!("{:x}", Sha256::digest(input));
    digest[..len.min(digest.len())].to_string()
}
