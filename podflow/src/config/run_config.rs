//! Plugin and run configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::node_config::{
    NodeConfig, ResolvedNodeConfig, ResourceSpec, RetryPolicyConfig, TolerationConfig,
};
use super::volumes::ExtraVolumeConfig;
use crate::errors::{ConfigError, PodflowError};

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Base URL of the pipelines API, e.g. `https://kubeflow.example.com/pipeline`.
    #[serde(default)]
    pub host: String,
    /// Run settings.
    pub run_config: RunConfig,
}

impl PluginConfig {
    /// Creates a configuration.
    #[must_use]
    pub fn new(host: impl Into<String>, run_config: RunConfig) -> Self {
        Self {
            host: host.into(),
            run_config,
        }
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::parse(&e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PodflowError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml_str(&raw)?)
    }

    /// Checks required keys and every per-node section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::missing("host"));
        }
        self.run_config.validate()
    }
}

/// Image pull policy applied to every unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImagePullPolicy {
    /// Always pull.
    Always,
    /// Pull when missing from the node.
    #[default]
    IfNotPresent,
    /// Never pull.
    Never,
}

impl ImagePullPolicy {
    /// Returns the Kubernetes spelling.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "Always",
            Self::IfNotPresent => "IfNotPresent",
            Self::Never => "Never",
        }
    }
}

/// How tasks are grouped into execution units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMergeStrategy {
    /// One unit per task.
    #[default]
    None,
    /// One unit for the whole graph.
    Full,
}

/// Persistent volume access modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    /// Read-write by a single node.
    ReadWriteOnce,
    /// Read-only by many nodes.
    ReadOnlyMany,
    /// Read-write by many nodes.
    ReadWriteMany,
    /// Read-write by a single pod.
    ReadWriteOncePod,
}

/// Shared data volume for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Storage class; the cluster default when absent.
    #[serde(default)]
    pub storageclass: Option<String>,
    /// Requested size.
    #[serde(default = "default_volume_size")]
    pub size: String,
    /// Access modes.
    #[serde(default = "default_access_modes")]
    pub access_modes: Vec<AccessMode>,
    /// Skip seeding the volume with the image's data directory.
    #[serde(default)]
    pub skip_init: bool,
    /// Keep the volume after the run.
    #[serde(default)]
    pub keep: bool,
    /// User id for every unit that mounts the volume.
    #[serde(default = "default_owner")]
    pub owner: Option<i64>,
}

fn default_volume_size() -> String {
    "1Gi".to_string()
}

fn default_access_modes() -> Vec<AccessMode> {
    vec![AccessMode::ReadWriteOnce]
}

#[allow(clippy::unnecessary_wraps)]
fn default_owner() -> Option<i64> {
    Some(0)
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            storageclass: None,
            size: default_volume_size(),
            access_modes: default_access_modes(),
            skip_init: false,
            keep: false,
            owner: default_owner(),
        }
    }
}

impl VolumeConfig {
    /// Sets skip-init.
    #[must_use]
    pub fn with_skip_init(mut self, skip_init: bool) -> Self {
        self.skip_init = skip_init;
        self
    }

    /// Sets volume retention.
    #[must_use]
    pub fn with_keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Sets the owner user id.
    #[must_use]
    pub fn with_owner(mut self, owner: Option<i64>) -> Self {
        self.owner = owner;
        self
    }

    /// Sets the storage class.
    #[must_use]
    pub fn with_storageclass(mut self, storageclass: impl Into<String>) -> Self {
        self.storageclass = Some(storageclass.into());
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let size: ResourceSpec = [("size", self.size.as_str())].into_iter().collect();
        size.validate("run_config.volume")?;
        if self.access_modes.is_empty() {
            return Err(ConfigError::new(
                "run_config.volume.access_modes",
                "at least one access mode is required",
            ));
        }
        Ok(())
    }
}

/// Tracking-system bootstrap settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Start a tracking run before any node executes.
    #[serde(default)]
    pub enabled: bool,
    /// Environment variable carrying the tracking run id into nodes.
    #[serde(default = "default_run_id_env")]
    pub run_id_env: String,
}

fn default_run_id_env() -> String {
    "MLFLOW_RUN_ID".to_string()
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            run_id_env: default_run_id_env(),
        }
    }
}

/// Settings for compiling and running one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Container image with the project installed.
    #[serde(default)]
    pub image: String,
    /// Pull policy for `image`.
    #[serde(default)]
    pub image_pull_policy: ImagePullPolicy,
    /// Project directory inside the image.
    #[serde(default = "default_root")]
    pub root: String,
    /// Experiment runs are filed under.
    #[serde(default)]
    pub experiment_name: String,
    /// Namespace of the experiment in multi-user deployments.
    #[serde(default)]
    pub experiment_namespace: Option<String>,
    /// Name of one-off runs.
    #[serde(default)]
    pub run_name: String,
    /// Display name of recurring runs.
    #[serde(default)]
    pub scheduled_run_name: Option<String>,
    /// Pipeline description.
    #[serde(default)]
    pub description: Option<String>,
    /// Block until a one-off run finishes.
    #[serde(default)]
    pub wait_for_completion: bool,
    /// Seconds to wait for a one-off run.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u64,
    /// Register catalogued local outputs as backend artifacts.
    #[serde(default = "default_true")]
    pub store_kedro_outputs_as_kfp_artifacts: bool,
    /// Cache staleness hint, e.g. `P0D`.
    #[serde(default)]
    pub max_cache_staleness: Option<String>,
    /// Seconds a finished workflow is kept.
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    /// Pipeline run after the graph regardless of its result.
    #[serde(default)]
    pub on_exit_pipeline: Option<String>,
    /// Task grouping.
    #[serde(default)]
    pub node_merge_strategy: NodeMergeStrategy,
    /// Tracking bootstrap.
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Prefix of process variables forwarded into node units.
    #[serde(default = "default_forward_env_prefix")]
    pub forward_env_prefix: String,
    /// Compute resources.
    #[serde(default)]
    pub resources: NodeConfig<ResourceSpec>,
    /// Retry policies.
    #[serde(default)]
    pub retry_policy: NodeConfig<RetryPolicyConfig>,
    /// Tolerations.
    #[serde(default)]
    pub tolerations: NodeConfig<Vec<TolerationConfig>>,
    /// Extra volumes.
    #[serde(default)]
    pub extra_volumes: NodeConfig<Vec<ExtraVolumeConfig>>,
    /// Shared data volume; none when absent.
    #[serde(default)]
    pub volume: Option<VolumeConfig>,
}

fn default_root() -> String {
    "/home/kedro".to_string()
}

fn default_wait_timeout() -> u64 {
    24 * 60 * 60
}

fn default_true() -> bool {
    true
}

fn default_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_forward_env_prefix() -> String {
    "KEDRO_CONFIG_".to_string()
}

impl RunConfig {
    /// Creates a run configuration with the required keys and defaults elsewhere.
    #[must_use]
    pub fn new(
        image: impl Into<String>,
        experiment_name: impl Into<String>,
        run_name: impl Into<String>,
    ) -> Self {
        Self {
            image: image.into(),
            image_pull_policy: ImagePullPolicy::default(),
            root: default_root(),
            experiment_name: experiment_name.into(),
            experiment_namespace: None,
            run_name: run_name.into(),
            scheduled_run_name: None,
            description: None,
            wait_for_completion: false,
            wait_timeout: default_wait_timeout(),
            store_kedro_outputs_as_kfp_artifacts: true,
            max_cache_staleness: None,
            ttl: default_ttl(),
            on_exit_pipeline: None,
            node_merge_strategy: NodeMergeStrategy::default(),
            tracking: TrackingConfig::default(),
            forward_env_prefix: default_forward_env_prefix(),
            resources: NodeConfig::new(),
            retry_policy: NodeConfig::new(),
            tolerations: NodeConfig::new(),
            extra_volumes: NodeConfig::new(),
            volume: None,
        }
    }

    /// Sets the image pull policy.
    #[must_use]
    pub fn with_image_pull_policy(mut self, policy: ImagePullPolicy) -> Self {
        self.image_pull_policy = policy;
        self
    }

    /// Sets the node merge strategy.
    #[must_use]
    pub fn with_node_merge_strategy(mut self, strategy: NodeMergeStrategy) -> Self {
        self.node_merge_strategy = strategy;
        self
    }

    /// Requests a shared data volume.
    #[must_use]
    pub fn with_volume(mut self, volume: VolumeConfig) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Sets the exit-hook pipeline.
    #[must_use]
    pub fn with_on_exit_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.on_exit_pipeline = Some(pipeline.into());
        self
    }

    /// Enables the tracking bootstrap.
    #[must_use]
    pub fn with_tracking(mut self, enabled: bool) -> Self {
        self.tracking.enabled = enabled;
        self
    }

    /// Sets the resources section.
    #[must_use]
    pub fn with_resources(mut self, resources: NodeConfig<ResourceSpec>) -> Self {
        self.resources = resources;
        self
    }

    /// Sets the retry policy section.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: NodeConfig<RetryPolicyConfig>) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Sets the tolerations section.
    #[must_use]
    pub fn with_tolerations(mut self, tolerations: NodeConfig<Vec<TolerationConfig>>) -> Self {
        self.tolerations = tolerations;
        self
    }

    /// Sets the extra volumes section.
    #[must_use]
    pub fn with_extra_volumes(mut self, extra_volumes: NodeConfig<Vec<ExtraVolumeConfig>>) -> Self {
        self.extra_volumes = extra_volumes;
        self
    }

    /// Sets the cache staleness hint.
    #[must_use]
    pub fn with_max_cache_staleness(mut self, staleness: impl Into<String>) -> Self {
        self.max_cache_staleness = Some(staleness.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Resolves every per-node section for `node`.
    pub fn resolve_node(&self, node: &str) -> ResolvedNodeConfig {
        ResolvedNodeConfig {
            resources: self.resources.resolve(node).unwrap_or_default(),
            retry_policy: self.retry_policy.resolve(node),
            tolerations: self.tolerations.resolve(node),
            extra_volumes: self.extra_volumes.resolve(node).unwrap_or_default(),
        }
    }

    /// The settings that apply when there is no per-task breakdown.
    pub fn resolve_default(&self) -> ResolvedNodeConfig {
        ResolvedNodeConfig {
            resources: self.resources.default_entry().cloned().unwrap_or_default(),
            retry_policy: self.retry_policy.default_entry().cloned(),
            tolerations: self.tolerations.default_entry().cloned(),
            extra_volumes: self.extra_volumes.default_entry().cloned().unwrap_or_default(),
        }
    }

    /// Directory the image keeps its data in.
    #[must_use]
    pub fn data_path(&self) -> String {
        format!("{}/data", self.root.trim_end_matches('/'))
    }

    /// Checks required keys and every per-node section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("run_config.image", &self.image),
            ("run_config.experiment_name", &self.experiment_name),
            ("run_config.run_name", &self.run_name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::missing(key));
            }
        }

        for (node, spec) in self.resources.entries() {
            spec.validate(&format!("run_config.resources.{node}"))?;
        }
        for (node, policy) in self.retry_policy.entries() {
            policy.validate(&format!("run_config.retry_policy.{node}"))?;
        }
        for (node, tolerations) in self.tolerations.entries() {
            for (i, toleration) in tolerations.iter().enumerate() {
                toleration.validate(&format!("run_config.tolerations.{node}[{i}]"))?;
            }
        }
        for (node, volumes) in self.extra_volumes.entries() {
            for (i, volume) in volumes.iter().enumerate() {
                volume.validate(&format!("run_config.extra_volumes.{node}[{i}]"))?;
            }
        }
        if let Some(volume) = &self.volume {
            volume.validate()?;
        }
        Ok(())
    }
}
