//! Extra volumes mounted into node units.
//!
//! Volume sources are a closed set. An unknown kind is rejected when the
//! configuration is parsed. Fields are read in snake_case and written in the
//! camelCase Kubernetes expects.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// A volume plus the path it is mounted at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraVolumeConfig {
    /// Absolute mount path inside the container.
    pub mount_path: String,
    /// The volume definition.
    pub volume: VolumeDefinition,
}

impl ExtraVolumeConfig {
    /// Creates an extra volume.
    #[must_use]
    pub fn new(mount_path: impl Into<String>, name: impl Into<String>, source: VolumeSource) -> Self {
        Self {
            mount_path: mount_path.into(),
            volume: VolumeDefinition {
                name: name.into(),
                source,
            },
        }
    }

    /// Checks the mount path and volume name.
    pub fn validate(&self, path: &str) -> Result<(), ConfigError> {
        if !self.mount_path.starts_with('/') {
            return Err(ConfigError::new(
                format!("{path}.mount_path"),
                format!("'{}' is not an absolute path", self.mount_path),
            ));
        }
        if self.volume.name.trim().is_empty() {
            return Err(ConfigError::new(format!("{path}.volume.name"), "must not be empty"));
        }
        Ok(())
    }
}

/// A named volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeDefinition {
    /// Volume name, unique within the unit.
    pub name: String,
    /// Where the data comes from.
    #[serde(flatten)]
    pub source: VolumeSource,
}

/// Supported volume kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub enum VolumeSource {
    /// Scratch space that lives as long as the pod.
    EmptyDir(EmptyDirSource),
    /// Keys of a config map projected as files.
    ConfigMap(ConfigMapSource),
    /// Keys of a secret projected as files.
    Secret(SecretSource),
    /// An existing persistent volume claim.
    PersistentVolumeClaim(PersistentVolumeClaimSource),
}

/// `emptyDir` source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct EmptyDirSource {
    /// `Memory` for a tmpfs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    /// Maximum size, e.g. `1Gi`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<String>,
}

/// Projection of one key to a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyToPath {
    /// Key in the config map or secret.
    pub key: String,
    /// Relative file path.
    pub path: String,
    /// File mode bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<i32>,
}

/// `configMap` source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct ConfigMapSource {
    /// Config map name.
    pub name: String,
    /// Default file mode bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<i32>,
    /// Keys to project; all keys when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<KeyToPath>,
    /// Whether the config map may be missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

/// `secret` source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct SecretSource {
    /// Secret name.
    pub secret_name: String,
    /// Default file mode bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<i32>,
    /// Keys to project; all keys when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<KeyToPath>,
    /// Whether the secret may be missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

/// `persistentVolumeClaim` source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct PersistentVolumeClaimSource {
    /// Claim name.
    pub claim_name: String,
    /// Mount read-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}
