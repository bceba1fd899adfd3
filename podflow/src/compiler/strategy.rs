//! Grouping strategies.
//!
//! A strategy decides how tasks are packed into execution units. The
//! generator handles everything else the same way for every strategy.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;

use super::naming::UnitNamer;
use crate::config::{NodeMergeStrategy, ResolvedNodeConfig, RunConfig};
use crate::errors::GraphValidationError;
use crate::graph::TaskGraph;

/// Tasks that run together in one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitGroup {
    /// Unit name.
    pub name: String,
    /// Tasks, in execution order.
    pub tasks: Vec<String>,
    /// Outputs written by the tasks.
    pub outputs: Vec<String>,
    /// Names of groups this one waits for.
    pub dependencies: BTreeSet<String>,
    /// Settings attached to the unit.
    pub config: ResolvedNodeConfig,
}

/// Packs tasks into units.
pub trait GroupingStrategy: Debug + Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Groups the tasks of `graph`, naming each group through `namer`.
    fn group(
        &self,
        graph: &TaskGraph,
        config: &RunConfig,
        namer: &mut UnitNamer,
    ) -> Result<Vec<UnitGroup>, GraphValidationError>;
}

/// One unit per task; edges mirror the task graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerNodeStrategy;

impl GroupingStrategy for PerNodeStrategy {
    fn name(&self) -> &'static str {
        "per-node"
    }

    fn group(
        &self,
        graph: &TaskGraph,
        config: &RunConfig,
        namer: &mut UnitNamer,
    ) -> Result<Vec<UnitGroup>, GraphValidationError> {
        let mut unit_names: HashMap<&str, String> = HashMap::with_capacity(graph.len());
        for task in graph.tasks() {
            unit_names.insert(task.name.as_str(), namer.claim(&task.name)?);
        }

        Ok(graph
            .tasks()
            .map(|task| UnitGroup {
                name: unit_names[task.name.as_str()].clone(),
                tasks: vec![task.name.clone()],
                outputs: task.outputs.clone(),
                dependencies: graph
                    .dependencies(&task.name)
                    .map(|dep| unit_names[dep].clone())
                    .collect(),
                config: config.resolve_node(&task.name),
            })
            .collect())
    }
}

/// One unit for the whole graph, named after the pipeline and configured
/// with the `__default__` settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergedStrategy;

impl GroupingStrategy for MergedStrategy {
    fn name(&self) -> &'static str {
        "merged"
    }

    fn group(
        &self,
        graph: &TaskGraph,
        config: &RunConfig,
        namer: &mut UnitNamer,
    ) -> Result<Vec<UnitGroup>, GraphValidationError> {
        Ok(vec![UnitGroup {
            name: namer.claim(graph.name())?,
            tasks: graph.execution_order().to_vec(),
            outputs: graph.outputs(),
            dependencies: BTreeSet::new(),
            config: config.resolve_default(),
        }])
    }
}

/// Returns the strategy selected by configuration.
#[must_use]
pub fn strategy_for(merge: NodeMergeStrategy) -> Box<dyn GroupingStrategy> {
    match merge {
        NodeMergeStrategy::None => Box::new(PerNodeStrategy),
        NodeMergeStrategy::Full => Box::new(MergedStrategy),
    }
}
