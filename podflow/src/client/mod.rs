//! Remote backend access.
//!
//! This module provides:
//! - The [`PipelineBackend`] trait and its records
//! - A Kubeflow Pipelines REST implementation
//! - The pipeline lifecycle client (upload, run, schedule, list)
//! - Run status normalization
//! - Shared volume deletion through the Kubernetes API

mod backend;
mod credentials;
mod kubeflow;
mod lifecycle;
mod run_status;
mod volume_reclaim;

pub use backend::{
    ExperimentRecord, ExperimentSpec, PipelineBackend, PipelineRecord, PipelineVersionRecord,
    RecurringRunRecord, RecurringRunRequest, RunRecord, RunRequest,
};
pub use credentials::{Credentials, COOKIE_ENV, TOKEN_ENV};
pub use kubeflow::KubeflowBackend;
pub use lifecycle::{
    pipeline_table, version_name, PipelineClient, RunOptions, ScheduleOptions, ScheduleOutcome,
    UploadOutcome, DEFAULT_POLL_INTERVAL, LIST_PAGE_SIZE, MAX_VERSION_NAME_LEN,
};
pub use run_status::{RunOutcome, RunStatus};
pub use volume_reclaim::{KubernetesVolumeReclaimer, SERVICE_ACCOUNT_DIR};
