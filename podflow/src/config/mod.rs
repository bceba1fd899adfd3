//! Configuration model.
//!
//! This module provides:
//! - The YAML plugin/run configuration
//! - Per-node sections with `__default__` fallback
//! - Extra volume definitions

mod node_config;
mod run_config;
mod volumes;

pub use node_config::{
    NodeConfig, Overlay, ResolvedNodeConfig, ResourceSpec, RetryPolicyConfig, TolerationConfig,
    TolerationEffect, TolerationOperator, ACCELERATOR_KEY, DEFAULT_KEY,
};
pub use run_config::{
    AccessMode, ImagePullPolicy, NodeMergeStrategy, PluginConfig, RunConfig, TrackingConfig,
    VolumeConfig,
};
pub use volumes::{
    ConfigMapSource, EmptyDirSource, ExtraVolumeConfig, KeyToPath, PersistentVolumeClaimSource,
    SecretSource, VolumeDefinition, VolumeSource,
};
