//! Run status normalization.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Finished successfully.
    Succeeded,
    /// A unit failed.
    Failed,
    /// Nothing ran.
    Skipped,
    /// The backend failed the run, or the wait timed out.
    Error,
    /// Not finished yet.
    Running,
}

impl RunStatus {
    /// Maps a backend status, case-insensitively. Anything that is not a
    /// terminal status counts as running.
    #[must_use]
    pub fn from_backend(status: Option<&str>) -> Self {
        match status.map(str::to_ascii_lowercase).as_deref() {
            Some("succeeded") => Self::Succeeded,
            Some("failed") => Self::Failed,
            Some("skipped") => Self::Skipped,
            Some("error") => Self::Error,
            _ => Self::Running,
        }
    }

    /// Returns true once the run can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns true for outcomes treated as success.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    /// Lowercase spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Error => "error",
            Self::Running => "running",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a one-off run submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Backend run id.
    pub run_id: String,
    /// Final status; absent when the caller did not wait.
    pub status: Option<RunStatus>,
    /// Error message from the backend or the wait.
    pub error: Option<String>,
}

impl RunOutcome {
    /// A run submitted without waiting.
    #[must_use]
    pub fn submitted(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: None,
            error: None,
        }
    }

    /// Process exit code: 0 for success or no wait, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.status {
            None => 0,
            Some(status) if status.is_success() => 0,
            Some(_) => 1,
        }
    }
}
