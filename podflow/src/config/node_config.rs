//! Per-node configuration with a `__default__` fallback.
//!
//! Sections such as `resources` or `retry_policy` are written as a mapping
//! from node name to settings, with the reserved `__default__` key applying to
//! every node. [`NodeConfig`] holds that mapping as an explicit two-tier
//! lookup and [`NodeConfig::resolve`] combines both tiers for one node.

use regex::Regex;
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::volumes::ExtraVolumeConfig;
use crate::errors::ConfigError;

/// Key that carries the settings shared by every node.
pub const DEFAULT_KEY: &str = "__default__";

/// Resource key whose value is a node label rather than a quantity.
pub const ACCELERATOR_KEY: &str = "cloud.google.com/gke-accelerator";

/// How a node-specific entry combines with the default entry.
pub trait Overlay: Clone {
    /// Returns the setting that applies when `node` overrides `self`.
    ///
    /// The default is full replacement: a node that names a section owns it.
    fn overlay(&self, node: &Self) -> Self {
        node.clone()
    }
}

/// A two-tier lookup: one optional base record plus per-node overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig<T> {
    base: Option<T>,
    overrides: BTreeMap<String, T>,
}

impl<T> Default for NodeConfig<T> {
    fn default() -> Self {
        Self {
            base: None,
            overrides: BTreeMap::new(),
        }
    }
}

impl<T: Overlay> NodeConfig<T> {
    /// Creates an empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the record shared by all nodes.
    #[must_use]
    pub fn with_default(mut self, value: T) -> Self {
        self.base = Some(value);
        self
    }

    /// Sets the record for a single node.
    #[must_use]
    pub fn with_override(mut self, node: impl Into<String>, value: T) -> Self {
        self.overrides.insert(node.into(), value);
        self
    }

    /// Resolves the setting for `node`, or `None` when neither tier has one.
    pub fn resolve(&self, node: &str) -> Option<T> {
        match (&self.base, self.overrides.get(node)) {
            (Some(base), Some(own)) => Some(base.overlay(own)),
            (None, Some(own)) => Some(own.clone()),
            (Some(base), None) => Some(base.clone()),
            (None, None) => None,
        }
    }

    /// Returns true if anything applies to `node`.
    pub fn is_set_for(&self, node: &str) -> bool {
        self.base.is_some() || self.overrides.contains_key(node)
    }

    /// Returns the shared record.
    pub fn default_entry(&self) -> Option<&T> {
        self.base.as_ref()
    }

    /// Returns true if the section is absent.
    pub fn is_empty(&self) -> bool {
        self.base.is_none() && self.overrides.is_empty()
    }

    /// Iterates over every entry, the default first, keyed as written.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &T)> {
        self.base
            .iter()
            .map(|base| (DEFAULT_KEY, base))
            .chain(self.overrides.iter().map(|(k, v)| (k.as_str(), v)))
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for NodeConfig<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut overrides = Option::<BTreeMap<String, T>>::deserialize(deserializer)?
            .unwrap_or_default();
        let base = overrides.remove(DEFAULT_KEY);
        Ok(Self { base, overrides })
    }
}

impl<T: Serialize> Serialize for NodeConfig<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.overrides.len() + usize::from(self.base.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(base) = &self.base {
            map.serialize_entry(DEFAULT_KEY, base)?;
        }
        for (node, value) in &self.overrides {
            map.serialize_entry(node, value)?;
        }
        map.end()
    }
}

impl<T: Clone> Overlay for Vec<T> {}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<RawQuantity> for String {
    fn from(raw: RawQuantity) -> Self {
        match raw {
            RawQuantity::Text(s) => s,
            RawQuantity::Int(i) => i.to_string(),
            RawQuantity::Float(f) => f.to_string(),
        }
    }
}

/// Compute resources for one node, keyed by resource name (`cpu`, `memory`,
/// `nvidia.com/gpu`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResourceSpec(BTreeMap<String, String>);

impl<'de> Deserialize<'de> for ResourceSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, RawQuantity>::deserialize(deserializer)?;
        Ok(Self(raw.into_iter().map(|(k, v)| (k, v.into())).collect()))
    }
}

impl Overlay for ResourceSpec {
    fn overlay(&self, node: &Self) -> Self {
        let mut merged = self.0.clone();
        merged.extend(node.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResourceSpec {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl ResourceSpec {
    /// Returns the value for one resource.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if no resource is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Quantities that become container limits and requests.
    pub fn quantities(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .filter(|(k, _)| k.as_str() != ACCELERATOR_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The accelerator type, which is scheduled through a node selector.
    pub fn accelerator(&self) -> Option<&str> {
        self.get(ACCELERATOR_KEY)
    }

    /// Checks every quantity against the Kubernetes quantity syntax.
    pub fn validate(&self, path: &str) -> Result<(), ConfigError> {
        for (key, value) in self.quantities() {
            if !quantity_pattern().is_match(&value) {
                return Err(ConfigError::new(
                    format!("{path}.{key}"),
                    format!("'{value}' is not a valid resource quantity"),
                ));
            }
        }
        Ok(())
    }
}

// Literal patterns, covered by test_static_patterns.
#[allow(clippy::expect_used)]
fn quantity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9]+(\.[0-9]+)?(m|k|M|G|T|P|E|Ki|Mi|Gi|Ti|Pi|Ei|e[0-9]+)?$")
            .expect("quantity pattern is valid")
    })
}

#[allow(clippy::expect_used)]
fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]+(s|m|h)$").expect("duration pattern is valid"))
}

/// Retry policy the backend applies when a unit fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Number of retries after the first attempt.
    pub num_retries: u32,
    /// Initial delay, e.g. `60s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_duration: Option<String>,
    /// Multiplier applied to the delay after each retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_factor: Option<f64>,
    /// Upper bound on the delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_max_duration: Option<String>,
}

impl Overlay for RetryPolicyConfig {}

impl RetryPolicyConfig {
    /// Creates a policy with only a retry count.
    #[must_use]
    pub fn new(num_retries: u32) -> Self {
        Self {
            num_retries,
            backoff_duration: None,
            backoff_factor: None,
            backoff_max_duration: None,
        }
    }

    /// Sets the backoff.
    #[must_use]
    pub fn with_backoff(mut self, duration: impl Into<String>, factor: f64) -> Self {
        self.backoff_duration = Some(duration.into());
        self.backoff_factor = Some(factor);
        self
    }

    /// Validates durations and the backoff factor.
    pub fn validate(&self, path: &str) -> Result<(), ConfigError> {
        for (key, value) in [
            ("backoff_duration", &self.backoff_duration),
            ("backoff_max_duration", &self.backoff_max_duration),
        ] {
            if let Some(value) = value {
                if !duration_pattern().is_match(value) {
                    return Err(ConfigError::new(
                        format!("{path}.{key}"),
                        format!("'{value}' is not a duration such as 30s, 5m or 1h"),
                    ));
                }
            }
        }
        if let Some(factor) = self.backoff_factor {
            if factor <= 0.0 || !factor.is_finite() {
                return Err(ConfigError::new(
                    format!("{path}.backoff_factor"),
                    "must be a positive number",
                ));
            }
        }
        Ok(())
    }
}

/// Toleration operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TolerationOperator {
    /// Key and value must match.
    #[default]
    Equal,
    /// Only the key must match.
    Exists,
}

/// Taint effect a toleration applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationEffect {
    /// Do not schedule onto the node.
    NoSchedule,
    /// Avoid scheduling onto the node.
    PreferNoSchedule,
    /// Evict running pods.
    NoExecute,
}

/// A single Kubernetes toleration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TolerationConfig {
    /// Taint key; empty matches every key when the operator is `Exists`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Match operator.
    #[serde(default)]
    pub operator: TolerationOperator,
    /// Taint value for `Equal`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Taint effect; absent matches all effects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<TolerationEffect>,
}

impl TolerationConfig {
    /// Creates an `Equal` toleration.
    #[must_use]
    pub fn equal(key: impl Into<String>, value: impl Into<String>, effect: TolerationEffect) -> Self {
        Self {
            key: Some(key.into()),
            operator: TolerationOperator::Equal,
            value: Some(value.into()),
            effect: Some(effect),
        }
    }

    /// Creates an `Exists` toleration.
    #[must_use]
    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            operator: TolerationOperator::Exists,
            value: None,
            effect: None,
        }
    }

    /// An `Exists` toleration must not carry a value.
    pub fn validate(&self, path: &str) -> Result<(), ConfigError> {
        if self.operator == TolerationOperator::Exists && self.value.is_some() {
            return Err(ConfigError::new(
                format!("{path}.value"),
                "a toleration with operator Exists must not set a value",
            ));
        }
        Ok(())
    }
}

/// Everything the compiler attaches to one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedNodeConfig {
    /// Merged resources; empty means none are attached.
    pub resources: ResourceSpec,
    /// Retry policy, if any.
    pub retry_policy: Option<RetryPolicyConfig>,
    /// Tolerations, if any.
    pub tolerations: Option<Vec<TolerationConfig>>,
    /// Additional volumes to mount.
    pub extra_volumes: Vec<ExtraVolumeConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resources(pairs: &[(&str, &str)]) -> ResourceSpec {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_static_patterns() {
        for quantity in ["500m", "8Gi", "1", "0.5", "1e3"] {
            assert!(quantity_pattern().is_match(quantity), "{quantity}");
        }
        assert!(!quantity_pattern().is_match("8 GB"));
        assert!(duration_pattern().is_match("30s"));
        assert!(!duration_pattern().is_match("1d"));
    }

    #[test]
    fn test_empty_section_resolves_to_nothing() {
        let section: NodeConfig<ResourceSpec> = NodeConfig::new();
        for node in ["node1", "other", ""] {
            assert_eq!(section.resolve(node), None);
            assert!(!section.is_set_for(node));
        }

        let retries: NodeConfig<RetryPolicyConfig> = NodeConfig::new();
        assert_eq!(retries.resolve("node1"), None);
    }

    #[test]
    fn test_default_applies_to_every_node() {
        let retry = RetryPolicyConfig::new(3).with_backoff("30s", 2.0);
        let section = NodeConfig::new().with_default(retry.clone());

        for node in ["node1", "never-seen", "x"] {
            assert_eq!(section.resolve(node), Some(retry.clone()));
            assert!(section.is_set_for(node));
        }
    }

    #[test]
    fn test_resources_merge_key_by_key() {
        let section = NodeConfig::new()
            .with_default(resources(&[("cpu", "200m")]))
            .with_override("heavy", resources(&[("memory", "8Gi")]));

        assert_eq!(
            section.resolve("heavy"),
            Some(resources(&[("cpu", "200m"), ("memory", "8Gi")]))
        );
        assert_eq!(section.resolve("light"), Some(resources(&[("cpu", "200m")])));
    }

    #[test]
    fn test_resources_node_value_wins() {
        let section = NodeConfig::new()
            .with_default(resources(&[("cpu", "200m"), ("memory", "1Gi")]))
            .with_override("node", resources(&[("cpu", "2")]));

        assert_eq!(
            section.resolve("node"),
            Some(resources(&[("cpu", "2"), ("memory", "1Gi")]))
        );
    }

    #[test]
    fn test_retry_policy_replaced_not_merged() {
        let section = NodeConfig::new()
            .with_default(RetryPolicyConfig::new(4).with_backoff("60s", 2.0))
            .with_override("node1", RetryPolicyConfig::new(1));

        let resolved = section.resolve("node1");
        assert_eq!(resolved, Some(RetryPolicyConfig::new(1)));
    }

    #[test]
    fn test_override_without_default() {
        let section = NodeConfig::new().with_override("gpu", vec![TolerationConfig::exists("gpu")]);

        assert_eq!(section.resolve("gpu").map(|t| t.len()), Some(1));
        assert_eq!(section.resolve("cpu"), None);
        assert!(section.is_set_for("gpu"));
        assert!(!section.is_set_for("cpu"));
    }

    #[test]
    fn test_deserialize_splits_default_key() {
        let yaml = r#"
__default__:
  cpu: 500m
  memory: 1Gi
node1:
  nvidia.com/gpu: 1
  cpu: 0.5
"#;
        let section: NodeConfig<ResourceSpec> = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(
            section.default_entry(),
            Some(&resources(&[("cpu", "500m"), ("memory", "1Gi")]))
        );
        assert_eq!(
            section.resolve("node1"),
            Some(resources(&[
                ("cpu", "0.5"),
                ("memory", "1Gi"),
                ("nvidia.com/gpu", "1"),
            ]))
        );
    }

    #[test]
    fn test_deserialize_null_section() {
        let section: NodeConfig<ResourceSpec> = serde_yaml::from_str("~").unwrap();
        assert!(section.is_empty());
    }

    #[test]
    fn test_serialize_round_trips_default_key() {
        let section = NodeConfig::new()
            .with_default(RetryPolicyConfig::new(2))
            .with_override("a", RetryPolicyConfig::new(5));

        let yaml = serde_yaml::to_string(&section).unwrap();
        assert!(yaml.contains("__default__"));
        let back: NodeConfig<RetryPolicyConfig> = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, section);
    }

    #[test]
    fn test_accelerator_is_not_a_quantity() {
        let spec = resources(&[("cpu", "1"), (ACCELERATOR_KEY, "nvidia-tesla-t4")]);

        assert_eq!(spec.accelerator(), Some("nvidia-tesla-t4"));
        assert!(!spec.quantities().contains_key(ACCELERATOR_KEY));
        assert!(spec.validate("resources.__default__").is_ok());
    }

    #[test]
    fn test_invalid_quantity_rejected() {
        let spec = resources(&[("memory", "lots")]);
        let err = spec.validate("run_config.resources.node1").unwrap_err();
        assert_eq!(err.path, "run_config.resources.node1.memory");
    }

    #[test]
    fn test_retry_policy_validation() {
        assert!(RetryPolicyConfig::new(1).with_backoff("5m", 1.5).validate("p").is_ok());

        let err = RetryPolicyConfig::new(1).with_backoff("soon", 2.0).validate("p").unwrap_err();
        assert_eq!(err.path, "p.backoff_duration");

        let err = RetryPolicyConfig::new(1).with_backoff("1h", 0.0).validate("p").unwrap_err();
        assert_eq!(err.path, "p.backoff_factor");
    }

    #[test]
    fn test_toleration_closed_sets() {
        let ok: TolerationConfig =
            serde_yaml::from_str("{key: gpu, operator: Equal, value: 'true', effect: NoSchedule}")
                .unwrap();
        assert_eq!(ok, TolerationConfig::equal("gpu", "true", TolerationEffect::NoSchedule));

        assert!(serde_yaml::from_str::<TolerationConfig>("{key: gpu, operator: Like}").is_err());
        assert!(serde_yaml::from_str::<TolerationConfig>("{key: gpu, effect: Sometimes}").is_err());
    }

    #[test]
    fn test_exists_toleration_with_value_rejected() {
        let mut toleration = TolerationConfig::exists("gpu");
        assert!(toleration.validate("t").is_ok());

        toleration.value = Some("yes".to_string());
        assert!(toleration.validate("t").is_err());
    }
}
