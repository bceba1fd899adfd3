//! Task definition.

use serde::{Deserialize, Serialize};

/// A node of the logical graph: a named unit of work with the artifacts it
/// reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task name.
    pub name: String,
    /// Artifact names read by the task, in declaration order.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Artifact names written by the task, in declaration order.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl Task {
    /// Creates a task with no inputs or outputs.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Sets the inputs. Repeated names are kept once.
    #[must_use]
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = dedup(inputs);
        self
    }

    /// Sets the outputs. Repeated names are kept once.
    #[must_use]
    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = dedup(outputs);
        self
    }

    /// Returns true if the task reads `artifact`.
    #[must_use]
    pub fn reads(&self, artifact: &str) -> bool {
        self.inputs.iter().any(|i| i == artifact)
    }
}

fn dedup<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.into();
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
