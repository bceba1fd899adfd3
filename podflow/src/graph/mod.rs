//! Logical task graph.
//!
//! This module provides:
//! - Tasks and the validated task graph
//! - The artifact catalog used to locate outputs
//! - Run-level parameters

mod catalog;
mod params;
mod task;
mod task_graph;

pub use catalog::{Catalog, CatalogEntry};
pub use params::{ParameterType, PipelineParameter, RunParameters};
pub use task::Task;
pub use task_graph::{GraphDocument, TaskDocument, TaskGraph, TaskGraphBuilder};
