//! Run-level parameters.
//!
//! Parameters arrive as a flat or dot-namespaced mapping. Dotted keys are
//! folded into nested objects, then every top-level key becomes one typed
//! pipeline parameter that can be edited at submission time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::errors::{codes, ErrorInfo, GraphValidationError, PodflowError};

/// Backend-native parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    /// Free text.
    String,
    /// Whole number.
    Integer,
    /// Floating point number.
    Float,
    /// `true` or `false`.
    Bool,
    /// JSON object.
    JsonObject,
    /// JSON array.
    JsonArray,
}

/// One typed pipeline parameter with its default value rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineParameter {
    /// Parameter name.
    pub name: String,
    /// Parameter type.
    #[serde(rename = "type")]
    pub kind: ParameterType,
    /// Default value.
    pub default: String,
}

impl PipelineParameter {
    fn from_value(name: &str, value: &Value) -> Self {
        let (kind, default) = match value {
            Value::Null => (ParameterType::String, String::new()),
            Value::Bool(b) => (ParameterType::Bool, b.to_string()),
            Value::Number(n) if n.is_f64() => (ParameterType::Float, n.to_string()),
            Value::Number(n) => (ParameterType::Integer, n.to_string()),
            Value::String(s) => (ParameterType::String, s.clone()),
            Value::Array(_) => (ParameterType::JsonArray, value.to_string()),
            Value::Object(_) => (ParameterType::JsonObject, value.to_string()),
        };
        Self {
            name: name.to_string(),
            kind,
            default,
        }
    }
}

/// Folded run parameters, keyed by top-level name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunParameters {
    values: BTreeMap<String, Value>,
}

impl RunParameters {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a flat mapping whose keys may be dot-namespaced.
    pub fn from_flat<I, K>(entries: I) -> Result<Self, GraphValidationError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut root = Map::new();
        for (key, value) in entries {
            let key = key.into();
            let path: Vec<&str> = key.split('.').collect();
            if path.iter().any(|segment| segment.is_empty()) {
                return Err(invalid_name(&key));
            }
            insert_path(&mut root, &path, value, &key)?;
        }

        let mut values = BTreeMap::new();
        for (name, value) in root {
            if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(invalid_name(&name));
            }
            values.insert(name, value);
        }
        Ok(Self { values })
    }

    /// Parses a YAML mapping of parameters.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PodflowError> {
        if yaml.trim().is_empty() {
            return Ok(Self::new());
        }
        let raw: Option<BTreeMap<String, Value>> = serde_yaml::from_str(yaml)?;
        Ok(Self::from_flat(raw.unwrap_or_default())?)
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of top-level parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns a folded value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Top-level names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Converts to typed pipeline parameters, sorted by name.
    #[must_use]
    pub fn to_pipeline_parameters(&self) -> Vec<PipelineParameter> {
        self.values
            .iter()
            .map(|(name, value)| PipelineParameter::from_value(name, value))
            .collect()
    }
}

fn insert_path(
    target: &mut Map<String, Value>,
    path: &[&str],
    value: Value,
    full_key: &str,
) -> Result<(), GraphValidationError> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(());
    };

    if rest.is_empty() {
        return match (target.get_mut(*head), value) {
            (None, value) => {
                target.insert((*head).to_string(), value);
                Ok(())
            }
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                for (key, value) in incoming {
                    insert_path(existing, &[key.as_str()], value, full_key)?;
                }
                Ok(())
            }
            (Some(_), _) => Err(conflict(full_key)),
        };
    }

    let child = target
        .entry((*head).to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    match child {
        Value::Object(map) => insert_path(map, rest, value, full_key),
        _ => Err(conflict(full_key)),
    }
}

fn conflict(key: &str) -> GraphValidationError {
    GraphValidationError::new(format!(
        "Parameter '{key}' conflicts with another parameter of the same namespace"
    ))
    .with_error_info(
        ErrorInfo::new(codes::PARAM_CONFLICT, format!("Cannot fold parameter '{key}'"))
            .with_fix_hint("A parameter cannot be both a value and a namespace."),
    )
}

fn invalid_name(key: &str) -> GraphValidationError {
    GraphValidationError::new(format!("Parameter name '{key}' is not valid")).with_error_info(
        ErrorInfo::new(codes::INVALID_NAME, format!("Invalid parameter name '{key}'"))
            .with_fix_hint("Use letters, digits, '_' and '-', with '.' only between namespaces."),
    )
}
