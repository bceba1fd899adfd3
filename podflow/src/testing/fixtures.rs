//! Ready-made graphs and configurations.

use crate::compiler::{ExecutionGraph, PipelineCompiler};
use crate::config::{PluginConfig, RunConfig};
use crate::graph::{Task, TaskGraph};

/// Host used by [`plugin_config`].
pub const TEST_HOST: &str = "http://localhost:8080/pipeline";

/// `node1: A -> B`, `node2: B -> C` in the pipeline `pipeline`.
#[must_use]
pub fn two_node_graph() -> TaskGraph {
    chain(["node1", "node2"])
}

/// Tasks that each consume the previous task's output.
///
/// # Panics
///
/// Panics if `names` is empty or contains duplicates.
#[must_use]
pub fn chain<I, S>(names: I) -> TaskGraph
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let tasks: Vec<Task> = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            Task::new(name)
                .with_inputs([artifact(i)])
                .with_outputs([artifact(i + 1)])
        })
        .collect();
    match TaskGraph::from_data_flow("pipeline", tasks) {
        Ok(graph) => graph,
        Err(err) => panic!("invalid fixture graph: {err}"),
    }
}

/// `width` independent tasks feeding one `join` task.
///
/// # Panics
///
/// Panics if `width` is zero.
#[must_use]
pub fn fan_in(width: usize) -> TaskGraph {
    let mut tasks: Vec<Task> = (0..width)
        .map(|i| {
            Task::new(format!("source_{i}"))
                .with_inputs(["raw"])
                .with_outputs([format!("part_{i}")])
        })
        .collect();
    tasks.push(
        Task::new("join")
            .with_inputs((0..width).map(|i| format!("part_{i}")))
            .with_outputs(["joined"]),
    );
    match TaskGraph::from_data_flow("pipeline", tasks) {
        Ok(graph) => graph,
        Err(err) => panic!("invalid fixture graph: {err}"),
    }
}

/// Run configuration with only the required keys.
#[must_use]
pub fn run_config() -> RunConfig {
    RunConfig::new("registry.local/project:latest", "test-experiment", "test-run")
}

/// Plugin configuration pointing at [`TEST_HOST`].
#[must_use]
pub fn plugin_config() -> PluginConfig {
    PluginConfig::new(TEST_HOST, run_config())
}

/// [`two_node_graph`] compiled with [`run_config`].
///
/// # Panics
///
/// Panics if compilation fails.
#[must_use]
pub fn execution_graph() -> ExecutionGraph {
    match PipelineCompiler::new("test-project", "base", run_config()).compile(&two_node_graph()) {
        Ok(graph) => graph,
        Err(err) => panic!("fixture graph failed to compile: {err}"),
    }
}

fn artifact(index: usize) -> String {
    format!("dataset_{index}")
}
