//! Task graph to execution graph compilation.
//!
//! This module provides:
//! - The execution unit and execution graph model
//! - Unit naming
//! - Runner commands
//! - Grouping strategies (per-node and merged)
//! - The shared volume lifecycle
//! - The pipeline compiler

mod command;
mod generator;
mod naming;
mod strategy;
mod unit;
mod volume;


pub use command::{
    RunnerCommand, RUN_ID_PLACEHOLDER, SHIM_PLACEHOLDER, TRACKING_RUN_ID_PATH,
    WORKFLOW_NAME_PLACEHOLDER,
};
pub use generator::{
    PipelineCompiler, MAX_CACHE_STALENESS_ANNOTATION, RUN_ID_ENV, TRACKING_RUN_ID_OUTPUT,
};
pub use naming::{
    sanitize_name, UnitNamer, EXIT_HANDLER_UNIT, MAX_NAME_LEN, RESERVED_UNIT_NAMES,
    TRACKING_UNIT, VOLUME_CLAIM_UNIT, VOLUME_INIT_UNIT,
};
pub use strategy::{strategy_for, GroupingStrategy, MergedStrategy, PerNodeStrategy, UnitGroup};
pub use unit::{
    Arg, ContainerSpec, EnvVar, ExecutionGraph, ExecutionUnit, FileOutput, PipelineMetadata,
    SharedVolume, UnitKind, VolumeClaimSpec, VolumeMount,
};
pub use volume::{MountSpec, ProvisionedVolume, VolumeManager, SHARED_VOLUME_NAME};
