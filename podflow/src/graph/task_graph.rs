//! Task graph with validation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

use super::Task;
use crate::errors::{codes, CycleDetectedError, ErrorInfo, GraphValidationError, PodflowError};

/// An immutable, validated task graph.
///
/// Every dependency names a task of the graph and the dependency relation is
/// acyclic. Tasks are visited in a deterministic topological order derived
/// from insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGraph {
    name: String,
    tasks: BTreeMap<String, Task>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
    execution_order: Vec<String>,
}

impl TaskGraph {
    /// Starts building a graph.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> TaskGraphBuilder {
        TaskGraphBuilder::new(name)
    }

    /// Builds a graph whose edges follow the data: a task depends on every
    /// task producing one of its inputs.
    pub fn from_data_flow(
        name: impl Into<String>,
        tasks: impl IntoIterator<Item = Task>,
    ) -> Result<Self, GraphValidationError> {
        let document = GraphDocument {
            name: name.into(),
            tasks: tasks
                .into_iter()
                .map(|task| TaskDocument {
                    task,
                    dependencies: Vec::new(),
                })
                .collect(),
        };
        document.into_graph()
    }

    /// Parses a JSON graph document.
    pub fn from_json_str(json: &str) -> Result<Self, PodflowError> {
        let document: GraphDocument = serde_json::from_str(json)?;
        Ok(document.into_graph()?)
    }

    /// Returns the graph (pipeline) name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Looks up a task.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// Returns the names `name` depends on, sorted.
    pub fn dependencies(&self, name: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(name)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Returns task names in execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Iterates over tasks in execution order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.execution_order
            .iter()
            .filter_map(|name| self.tasks.get(name))
    }

    /// Returns every declared output, each once, in execution order.
    #[must_use]
    pub fn outputs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tasks()
            .flat_map(|task| task.outputs.iter())
            .filter(|output| seen.insert(output.as_str()))
            .cloned()
            .collect()
    }
}

/// Builder for creating validated task graphs.
#[derive(Debug, Clone)]
pub struct TaskGraphBuilder {
    name: String,
    tasks: HashMap<String, Task>,
    dependencies: HashMap<String, BTreeSet<String>>,
    insertion_order: Vec<String>,
}

impl TaskGraphBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: HashMap::new(),
            dependencies: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// Adds a task with its dependencies.
    pub fn task(mut self, task: Task, dependencies: &[&str]) -> Result<Self, GraphValidationError> {
        self.add_task(task, dependencies.iter().copied())?;
        Ok(self)
    }

    /// Adds a task with its dependencies.
    ///
    /// Dependencies may name tasks added later; they are checked by
    /// [`build`](Self::build).
    pub fn add_task<I, S>(&mut self, task: Task, dependencies: I) -> Result<(), GraphValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if task.name.trim().is_empty() {
            return Err(GraphValidationError::new("Task name must not be empty").with_error_info(
                ErrorInfo::new(codes::INVALID_NAME, "Empty task name"),
            ));
        }
        if self.tasks.contains_key(&task.name) {
            return Err(GraphValidationError::new(format!(
                "Task '{}' is defined more than once",
                task.name
            ))
            .with_tasks(vec![task.name.clone()])
            .with_error_info(
                ErrorInfo::new(codes::DUPLICATE, format!("Duplicate task '{}'", task.name))
                    .with_fix_hint("Give every task a unique name."),
            ));
        }

        let deps: BTreeSet<String> = dependencies.into_iter().map(Into::into).collect();
        if deps.contains(&task.name) {
            return Err(CycleDetectedError::new(vec![task.name.clone(), task.name.clone()]).into());
        }

        self.insertion_order.push(task.name.clone());
        self.dependencies.insert(task.name.clone(), deps);
        self.tasks.insert(task.name.clone(), task);
        Ok(())
    }

    /// Returns the number of tasks added so far.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Validates closure and acyclicity and builds the graph.
    pub fn build(self) -> Result<TaskGraph, GraphValidationError> {
        if self.tasks.is_empty() {
            return Err(GraphValidationError::new("Task graph has no tasks").with_error_info(
                ErrorInfo::new(codes::EMPTY, "Cannot compile an empty task graph")
                    .with_fix_hint("Add at least one task to the graph."),
            ));
        }

        for name in &self.insertion_order {
            for dep in &self.dependencies[name] {
                if !self.tasks.contains_key(dep) {
                    return Err(GraphValidationError::new(format!(
                        "Task '{name}' depends on unknown task '{dep}'"
                    ))
                    .with_tasks(vec![name.clone(), dep.clone()])
                    .with_error_info(
                        ErrorInfo::new(codes::MISSING_DEP, format!("Dependency '{dep}' not found"))
                            .with_fix_hint("Ensure every dependency is a task of the same graph."),
                    ));
                }
            }
        }

        self.detect_cycles()?;

        let execution_order = topological_sort(&self.dependencies, &self.insertion_order);
        debug!(
            graph = %self.name,
            tasks = execution_order.len(),
            "Task graph validated"
        );

        Ok(TaskGraph {
            name: self.name,
            tasks: self.tasks.into_iter().collect(),
            dependencies: self.dependencies.into_iter().collect(),
            execution_order,
        })
    }

    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for name in &self.insertion_order {
            if !visited.contains(name) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(deps) = self.dependencies.get(node) {
            for dep in deps {
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep) {
                    let cycle_start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = path[cycle_start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}

/// Depth-first topological sort, visiting roots in insertion order.
fn topological_sort(
    dependencies: &HashMap<String, BTreeSet<String>>,
    insertion_order: &[String],
) -> Vec<String> {
    fn visit(
        node: &str,
        dependencies: &HashMap<String, BTreeSet<String>>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(node.to_string()) {
            return;
        }
        if let Some(deps) = dependencies.get(node) {
            for dep in deps {
                visit(dep, dependencies, visited, result);
            }
        }
        result.push(node.to_string());
    }

    let mut result = Vec::with_capacity(insertion_order.len());
    let mut visited = HashSet::new();
    for name in insertion_order {
        visit(name, dependencies, &mut visited, &mut result);
    }
    result
}

/// Serialized form of a task graph, as exported by the project tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Pipeline name.
    pub name: String,
    /// Tasks.
    pub tasks: Vec<TaskDocument>,
}

/// One task of a [`GraphDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDocument {
    /// The task.
    #[serde(flatten)]
    pub task: Task,
    /// Dependencies in addition to those implied by the data flow.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl GraphDocument {
    /// Builds the graph. Declared dependencies are combined with the ones
    /// implied by inputs and outputs.
    pub fn into_graph(self) -> Result<TaskGraph, GraphValidationError> {
        let mut producers: HashMap<&str, Vec<&str>> = HashMap::new();
        for doc in &self.tasks {
            for output in &doc.task.outputs {
                producers
                    .entry(output.as_str())
                    .or_default()
                    .push(doc.task.name.as_str());
            }
        }

        let mut edges: Vec<BTreeSet<String>> = Vec::with_capacity(self.tasks.len());
        for doc in &self.tasks {
            let mut deps: BTreeSet<String> = doc.dependencies.iter().cloned().collect();
            for input in &doc.task.inputs {
                for producer in producers.get(input.as_str()).into_iter().flatten() {
                    if *producer != doc.task.name {
                        deps.insert((*producer).to_string());
                    }
                }
            }
            edges.push(deps);
        }

        let mut builder = TaskGraphBuilder::new(self.name);
        for (doc, deps) in self.tasks.into_iter().zip(edges) {
            builder.add_task(doc.task, deps)?;
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chain() -> TaskGraph {
        TaskGraph::builder("pipeline")
            .task(Task::new("A"), &[])
            .unwrap()
            .task(Task::new("B"), &["A"])
            .unwrap()
            .task(Task::new("C"), &["B"])
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_creation() {
        let builder = TaskGraph::builder("test");
        assert_eq!(builder.task_count(), 0);
    }

    #[test]
    fn test_chain_dependencies() {
        let graph = chain();

        assert_eq!(graph.name(), "pipeline");
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependencies("A").count(), 0);
        assert_eq!(graph.dependencies("B").collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(graph.dependencies("C").collect::<Vec<_>>(), vec!["B"]);
        assert_eq!(graph.execution_order(), ["A", "B", "C"]);
    }

    #[test]
    fn test_forward_references_resolved_at_build() {
        let graph = TaskGraph::builder("p")
            .task(Task::new("late"), &["early"])
            .unwrap()
            .task(Task::new("early"), &[])
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(graph.execution_order(), ["early", "late"]);
    }

    #[test]
    fn test_missing_dependency() {
        let err = TaskGraph::builder("p")
            .task(Task::new("a"), &["missing"])
            .unwrap()
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some(codes::MISSING_DEP));
        assert_eq!(err.tasks, vec!["a".to_string(), "missing".to_string()]);
    }

    #[test]
    fn test_self_dependency() {
        let err = TaskGraph::builder("p").task(Task::new("a"), &["a"]).unwrap_err();
        assert_eq!(err.code(), Some(codes::CYCLE));
    }

    #[test]
    fn test_cycle_detection() {
        let err = TaskGraph::builder("p")
            .task(Task::new("a"), &["c"])
            .unwrap()
            .task(Task::new("b"), &["a"])
            .unwrap()
            .task(Task::new("c"), &["b"])
            .unwrap()
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some(codes::CYCLE));
        assert_eq!(err.tasks.first(), err.tasks.last());
        assert_eq!(err.tasks.len(), 4);
    }

    #[test]
    fn test_duplicate_task() {
        let err = TaskGraph::builder("p")
            .task(Task::new("a"), &[])
            .unwrap()
            .task(Task::new("a"), &[])
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::DUPLICATE));
    }

    #[test]
    fn test_empty_graph() {
        let err = TaskGraph::builder("p").build().unwrap_err();
        assert_eq!(err.code(), Some(codes::EMPTY));
    }

    #[test]
    fn test_empty_name() {
        let err = TaskGraph::builder("p").task(Task::new(" "), &[]).unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_NAME));
    }

    #[test]
    fn test_from_data_flow() {
        let graph = TaskGraph::from_data_flow(
            "p",
            [
                Task::new("node2").with_inputs(["B"]).with_outputs(["C"]),
                Task::new("node1").with_inputs(["A"]).with_outputs(["B"]),
            ],
        )
        .unwrap();

        assert_eq!(graph.dependencies("node2").collect::<Vec<_>>(), vec!["node1"]);
        assert_eq!(graph.dependencies("node1").count(), 0);
        assert_eq!(graph.execution_order(), ["node1", "node2"]);
        assert_eq!(graph.outputs(), vec!["B".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_from_json_merges_declared_dependencies() {
        let json = r#"{
            "name": "__default__",
            "tasks": [
                {"name": "prep", "outputs": ["clean"]},
                {"name": "train", "inputs": ["clean"], "outputs": ["model"]},
                {"name": "report", "dependencies": ["train"]}
            ]
        }"#;
        let graph = TaskGraph::from_json_str(json).unwrap();

        assert_eq!(graph.name(), "__default__");
        assert_eq!(graph.dependencies("train").collect::<Vec<_>>(), vec!["prep"]);
        assert_eq!(graph.dependencies("report").collect::<Vec<_>>(), vec!["train"]);
    }

    #[test]
    fn test_from_json_rejects_bad_document() {
        assert!(matches!(
            TaskGraph::from_json_str("{\"name\": 1}"),
            Err(PodflowError::Serialization(_))
        ));
    }

    #[test]
    fn test_topological_order_is_deterministic() {
        let build = || {
            TaskGraph::builder("p")
                .task(Task::new("x"), &[])
                .unwrap()
                .task(Task::new("y"), &[])
                .unwrap()
                .task(Task::new("z"), &["y", "x"])
                .unwrap()
                .build()
                .unwrap()
        };

        assert_eq!(build().execution_order(), ["x", "y", "z"]);
        assert_eq!(build(), build());
    }
}
