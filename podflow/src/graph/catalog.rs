//! Artifact catalog lookup.
//!
//! The compiler only needs to know whether an output has a path on the
//! container's local filesystem; everything else about a dataset is opaque.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::PodflowError;

/// One catalog entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Dataset type.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Storage location, relative to the project root or with a protocol prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    /// Data layer label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
}

impl CatalogEntry {
    /// Creates an entry stored at `filepath`.
    #[must_use]
    pub fn at(filepath: impl Into<String>) -> Self {
        Self {
            filepath: Some(filepath.into()),
            ..Self::default()
        }
    }

    /// Returns the path if the entry lives on the local filesystem.
    #[must_use]
    pub fn local_path(&self) -> Option<&str> {
        let filepath = self.filepath.as_deref()?;
        match filepath.split_once("://") {
            None => Some(filepath),
            Some(("file", path)) => Some(path),
            Some(_) => None,
        }
    }
}

/// Artifact name to catalog entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog(BTreeMap<String, CatalogEntry>);

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    #[must_use]
    pub fn with_entry(mut self, name: impl Into<String>, entry: CatalogEntry) -> Self {
        self.0.insert(name.into(), entry);
        self
    }

    /// Parses a YAML catalog. Keys starting with `_` hold shared anchors and
    /// are skipped, as are entries that are not mappings.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PodflowError> {
        if yaml.trim().is_empty() {
            return Ok(Self::new());
        }
        let raw: Option<BTreeMap<String, serde_yaml::Value>> = serde_yaml::from_str(yaml)?;
        let mut catalog = Self::new();
        for (name, value) in raw.unwrap_or_default() {
            if name.starts_with('_') || !value.is_mapping() {
                continue;
            }
            let entry: CatalogEntry = serde_yaml::from_value(value)?;
            catalog.0.insert(name, entry);
        }
        Ok(catalog)
    }

    /// Looks up an artifact.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.0.get(name)
    }

    /// Returns the local path of an artifact, or `None` when it is not
    /// catalogued or not on the local filesystem.
    #[must_use]
    pub fn local_path(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(CatalogEntry::local_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_path_detection() {
        assert_eq!(CatalogEntry::at("data/01_raw/x.csv").local_path(), Some("data/01_raw/x.csv"));
        assert_eq!(CatalogEntry::at("file:///tmp/x.csv").local_path(), Some("/tmp/x.csv"));
        assert_eq!(CatalogEntry::at("gs://bucket/x.csv").local_path(), None);
        assert_eq!(CatalogEntry::default().local_path(), None);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r"
_defaults:
  type: pandas.CSVDataSet

companies:
  type: pandas.CSVDataSet
  filepath: data/01_raw/companies.csv
  layer: raw

model:
  type: pickle.PickleDataSet
  filepath: s3://bucket/model.pkl

memory_only:
  type: MemoryDataSet
";
        let catalog = Catalog::from_yaml_str(yaml).unwrap();

        assert!(catalog.get("_defaults").is_none());
        assert_eq!(catalog.local_path("companies"), Some("data/01_raw/companies.csv"));
        assert_eq!(catalog.get("companies").and_then(|e| e.layer.as_deref()), Some("raw"));
        assert_eq!(catalog.local_path("model"), None);
        assert_eq!(catalog.local_path("memory_only"), None);
        assert_eq!(catalog.local_path("unknown"), None);
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(Catalog::from_yaml_str("").unwrap(), Catalog::new());
    }
}
