//! Unit naming.

use std::collections::BTreeMap;

use crate::errors::{codes, ErrorInfo, GraphValidationError};

/// Longest name the backend accepts for a template.
pub const MAX_NAME_LEN: usize = 63;

/// Unit creating the shared volume claim.
pub const VOLUME_CLAIM_UNIT: &str = "data-volume-create";
/// Unit seeding the shared volume.
pub const VOLUME_INIT_UNIT: &str = "data-volume-init";
/// Unit run after the graph.
pub const EXIT_HANDLER_UNIT: &str = "on-exit";
/// Unit starting the tracking run.
pub const TRACKING_UNIT: &str = "tracking-start-run";

/// Names the compiler emits on its own.
pub const RESERVED_UNIT_NAMES: [&str; 4] = [
    VOLUME_CLAIM_UNIT,
    VOLUME_INIT_UNIT,
    EXIT_HANDLER_UNIT,
    TRACKING_UNIT,
];

/// Maps a name onto the Kubernetes object name charset: letters are
/// lowercased, runs of anything outside `[a-z0-9]` become one `-`, edge
/// dashes are dropped and the result is cut to [`MAX_NAME_LEN`].
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out.truncate(MAX_NAME_LEN);
    out.trim_end_matches('-').to_string()
}

/// Hands out unit names and refuses duplicates.
#[derive(Debug, Clone, Default)]
pub struct UnitNamer {
    owners: BTreeMap<String, String>,
}

impl UnitNamer {
    /// Creates a namer with the compiler's reserved names taken.
    #[must_use]
    pub fn new() -> Self {
        let mut namer = Self::default();
        for name in RESERVED_UNIT_NAMES {
            namer.owners.insert(name.to_string(), format!("reserved unit '{name}'"));
        }
        namer
    }

    /// Marks a name as used by something other than a task.
    #[must_use]
    pub fn with_reserved(mut self, name: impl Into<String>, owner: impl Into<String>) -> Self {
        self.owners.insert(name.into(), owner.into());
        self
    }

    /// Derives the unit name for `source` and records it.
    pub fn claim(&mut self, source: &str) -> Result<String, GraphValidationError> {
        let name = sanitize_name(source);
        if name.is_empty() {
            return Err(GraphValidationError::new(format!(
                "'{source}' has no characters usable in a unit name"
            ))
            .with_tasks(vec![source.to_string()])
            .with_error_info(ErrorInfo::new(
                codes::INVALID_NAME,
                format!("'{source}' normalizes to an empty name"),
            )));
        }
        if let Some(owner) = self.owners.get(&name) {
            return Err(GraphValidationError::new(format!(
                "'{source}' and {owner} both map to name '{name}'"
            ))
            .with_tasks(vec![source.to_string()])
            .with_error_info(
                ErrorInfo::new(codes::NAME_COLLISION, format!("Unit name '{name}' is taken"))
                    .with_fix_hint("Rename one of them so the names differ in more than case or punctuation.")
                    .with_context_entry("unit", name.clone()),
            ));
        }
        self.owners.insert(name.clone(), format!("'{source}'"));
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_collapses_and_strips() {
        assert_eq!(sanitize_name("node1"), "node1");
        assert_eq!(sanitize_name("__default__"), "default");
        assert_eq!(sanitize_name("preprocess_companies_node"), "preprocess-companies-node");
        assert_eq!(sanitize_name("split([a, b]) -> [c]"), "split-a-b-c");
        assert_eq!(sanitize_name("___"), "");
        assert_eq!(sanitize_name("My Project"), "my-project");
        assert_eq!(sanitize_name("Training_Pipeline"), "training-pipeline");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "a".repeat(70);
        assert_eq!(sanitize_name(&long).len(), MAX_NAME_LEN);

        let edge = format!("{}_b", "a".repeat(62));
        assert_eq!(sanitize_name(&edge), "a".repeat(62));
    }

    #[test]
    fn test_namer_detects_collisions() {
        let mut namer = UnitNamer::new();
        assert_eq!(namer.claim("my_node").unwrap(), "my-node");

        let err = namer.claim("my-node").unwrap_err();
        assert_eq!(err.code(), Some(codes::NAME_COLLISION));
        assert!(err.message.contains("'my_node'"));

        let err = namer.claim("My_Node").unwrap_err();
        assert_eq!(err.code(), Some(codes::NAME_COLLISION));
    }

    #[test]
    fn test_namer_rejects_reserved_names() {
        let mut namer = UnitNamer::new().with_reserved("project", "the pipeline template");

        for name in ["on_exit", "data-volume-create", "tracking start run", "project"] {
            let err = namer.claim(name).unwrap_err();
            assert_eq!(err.code(), Some(codes::NAME_COLLISION), "{name}");
        }
    }

    #[test]
    fn test_namer_rejects_empty_names() {
        let err = UnitNamer::new().claim("!!!").unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_NAME));
    }
}
