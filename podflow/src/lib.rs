//! # Podflow
//!
//! Compiles task dependency graphs into Kubeflow Pipelines workflows and
//! manages their lifecycle on a remote backend.
//!
//! Podflow provides:
//!
//! - **Graph compilation**: per-node or merged execution units, deterministic output
//! - **Node configuration**: resources, retries, tolerations and extra volumes with `__default__` fallback
//! - **Shared volumes**: claim creation, initialisation, mounting and deletion on exit
//! - **Lifecycle client**: upload-or-version, run with optional wait, schedule with replacement
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use podflow::prelude::*;
//!
//! let config = PluginConfig::load("conf/base/kubeflow.yaml")?;
//! let graph = TaskGraph::from_data_flow("__default__", tasks)?;
//!
//! let compiled = PipelineCompiler::new("my-project", "base", config.run_config.clone())
//!     .compile(&graph)?;
//! render(&compiled)?.write_to("pipeline.yaml")?;
//!
//! let backend = KubeflowBackend::new(&config.host, Credentials::from_env())?;
//! let outcome = PipelineClient::new(backend, &config.host).upload(&compiled, "my-pipeline").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod client;
pub mod compiler;
pub mod config;
pub mod errors;
pub mod graph;
pub mod observability;
pub mod testing;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::{
        Credentials, ExperimentSpec, KubeflowBackend, KubernetesVolumeReclaimer, PipelineBackend,
        PipelineClient, RunOptions, RunOutcome, RunStatus, ScheduleOptions,
    };
    pub use crate::compiler::{
        ExecutionGraph, ExecutionUnit, GroupingStrategy, PipelineCompiler, UnitKind,
    };
    pub use crate::config::{NodeConfig, NodeMergeStrategy, PluginConfig, RunConfig, VolumeConfig};
    pub use crate::errors::{
        BackendError, ConfigError, CycleDetectedError, GraphValidationError, PodflowError,
    };
    pub use crate::graph::{Catalog, RunParameters, Task, TaskGraph};
    pub use crate::workflow::{render, Workflow};
}
