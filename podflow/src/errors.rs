//! Error types for podflow.
//!
//! Every fallible operation in the library returns [`PodflowError`] or one of
//! the narrower error types it wraps. Configuration and graph problems are
//! detected before any backend call is made.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for podflow operations.
#[derive(Debug, Error)]
pub enum PodflowError {
    /// Malformed or missing configuration.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The task graph or its parameters failed validation.
    #[error("{0}")]
    Validation(#[from] GraphValidationError),

    /// The remote orchestration backend rejected a request or was unreachable.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// The backend has no notion of the requested operation.
    #[error("Operation '{operation}' is not supported by the {backend} backend")]
    Unsupported {
        /// The rejected operation.
        operation: String,
        /// The backend that rejected it.
        backend: String,
    },

    /// No pipeline with the given name exists on the backend.
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PodflowError {
    /// Creates an unsupported-operation error.
    #[must_use]
    pub fn unsupported(operation: impl Into<String>, backend: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            backend: backend.into(),
        }
    }
}

impl From<CycleDetectedError> for PodflowError {
    fn from(err: CycleDetectedError) -> Self {
        Self::Validation(err.into())
    }
}

impl From<serde_json::Error> for PodflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PodflowError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a validation error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "GRAPH-001-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error codes attached to [`GraphValidationError`].
pub mod codes {
    /// The graph has no tasks.
    pub const EMPTY: &str = "GRAPH-001-EMPTY";
    /// Two tasks share a name.
    pub const DUPLICATE: &str = "GRAPH-002-DUPLICATE";
    /// A dependency names a task outside the graph.
    pub const MISSING_DEP: &str = "GRAPH-003-MISSING_DEP";
    /// The dependency relation contains a cycle.
    pub const CYCLE: &str = "GRAPH-004-CYCLE";
    /// Two tasks map to the same execution unit name.
    pub const NAME_COLLISION: &str = "GRAPH-005-NAME_COLLISION";
    /// Run parameters cannot be folded into a nested structure.
    pub const PARAM_CONFLICT: &str = "GRAPH-006-PARAM_CONFLICT";
    /// A task name is empty or normalizes to nothing.
    pub const INVALID_NAME: &str = "GRAPH-007-INVALID_NAME";
}

/// Error raised when the task graph fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GraphValidationError {
    /// The error message.
    pub message: String,
    /// The tasks involved in the error.
    pub tasks: Vec<String>,
    /// Optional diagnostic info.
    pub error_info: Option<ErrorInfo>,
}

impl GraphValidationError {
    /// Creates a new graph validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            tasks: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the tasks involved.
    #[must_use]
    pub fn with_tasks(mut self, tasks: Vec<String>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if one was attached.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the task graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in task graph: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of tasks forming the cycle.
    pub cycle_path: Vec<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ErrorInfo::new(
            codes::CYCLE,
            format!("Task graph contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for GraphValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            tasks: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Error raised for malformed or missing configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid configuration{}: {message}", fmt_path(path))]
pub struct ConfigError {
    /// Dotted path of the offending key, empty for document-level problems.
    pub path: String,
    /// What is wrong with it.
    pub message: String,
}

fn fmt_path(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" at '{path}'")
    }
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an error for a required key that is absent.
    #[must_use]
    pub fn missing(path: impl Into<String>) -> Self {
        Self::new(path, "required key is missing")
    }

    /// Creates an error for a document that could not be parsed at all.
    #[must_use]
    pub fn parse(err: &serde_yaml::Error) -> Self {
        Self::new("", err.to_string())
    }
}

/// Errors returned by the remote orchestration backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend answered with a non-success status.
    #[error("Backend returned HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, verbatim.
        body: String,
    },

    /// The request never produced a response.
    #[error("Backend transport error: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("Backend response could not be decoded: {0}")]
    Decode(String),
}

impl BackendError {
    /// Returns the HTTP status, if the backend produced one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true for a 404 answer.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<reqwest::Error> for PodflowError {
    fn from(err: reqwest::Error) -> Self {
        Self::Backend(err.into())
    }
}
