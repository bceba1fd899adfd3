//! Backend trait and the records it exchanges.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::PodflowError;

/// A pipeline in the backend catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRecord {
    /// Opaque id.
    pub id: String,
    /// Unique name.
    pub name: String,
    /// First version created with the pipeline.
    pub default_version_id: Option<String>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
}

/// One immutable version of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineVersionRecord {
    /// Opaque id.
    pub id: String,
    /// Version name.
    pub name: String,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
}

/// Experiment lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Experiment name.
    pub name: String,
    /// Owning namespace in multi-user deployments.
    pub namespace: Option<String>,
}

impl ExperimentSpec {
    /// Creates a key without a namespace.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }
}

/// An experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    /// Opaque id.
    pub id: String,
    /// Name.
    pub name: String,
}

/// A one-off run submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Experiment the run is filed under.
    pub experiment_id: String,
    /// Run name.
    pub name: String,
    /// Workflow document as JSON.
    pub workflow_manifest: String,
    /// Parameter values overriding the defaults.
    pub parameters: BTreeMap<String, String>,
}

/// A run as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Opaque id.
    pub id: String,
    /// Name.
    pub name: String,
    /// Raw backend status, absent until the run is picked up.
    pub status: Option<String>,
    /// Error reported by the backend.
    pub error: Option<String>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Completion time.
    pub finished_at: Option<DateTime<Utc>>,
}

/// A recurring run submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringRunRequest {
    /// Experiment the runs are filed under.
    pub experiment_id: String,
    /// Pipeline to run.
    pub pipeline_id: String,
    /// Display name.
    pub name: String,
    /// Cron expression.
    pub cron: String,
    /// Runs allowed at the same time.
    pub max_concurrency: u32,
    /// Whether the trigger is active.
    pub enabled: bool,
}

/// A recurring run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringRunRecord {
    /// Opaque id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Pipeline it runs, when it targets one by id.
    pub pipeline_id: Option<String>,
    /// Cron expression.
    pub cron: Option<String>,
    /// Whether the trigger is active.
    pub enabled: bool,
}

/// Remote pipeline orchestration backend.
///
/// "Not found" lookups return `Ok(None)`; every other failure is an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PipelineBackend: Send + Sync {
    /// Short backend name for messages.
    fn name(&self) -> &'static str;

    /// Whether pipelines can carry more than one version.
    fn supports_versioning(&self) -> bool;

    /// Finds a pipeline by exact name.
    async fn find_pipeline(&self, name: &str) -> Result<Option<PipelineRecord>, PodflowError>;

    /// Lists the first `page_size` pipelines.
    async fn list_pipelines(&self, page_size: usize) -> Result<Vec<PipelineRecord>, PodflowError>;

    /// Creates a pipeline from a workflow document.
    async fn upload_pipeline(&self, name: &str, document: &str) -> Result<PipelineRecord, PodflowError>;

    /// Adds a version to an existing pipeline.
    async fn upload_pipeline_version(
        &self,
        pipeline_id: &str,
        version_name: &str,
        document: &str,
    ) -> Result<PipelineVersionRecord, PodflowError>;

    /// Finds an experiment by name.
    async fn find_experiment(&self, spec: &ExperimentSpec) -> Result<Option<ExperimentRecord>, PodflowError>;

    /// Creates an experiment.
    async fn create_experiment(&self, spec: &ExperimentSpec) -> Result<ExperimentRecord, PodflowError>;

    /// Submits a run.
    async fn create_run(&self, request: &RunRequest) -> Result<RunRecord, PodflowError>;

    /// Reads a run.
    async fn get_run(&self, run_id: &str) -> Result<RunRecord, PodflowError>;

    /// Lists recurring runs of an experiment.
    async fn list_recurring_runs(&self, experiment_id: &str) -> Result<Vec<RecurringRunRecord>, PodflowError>;

    /// Creates a recurring run.
    async fn create_recurring_run(&self, request: &RecurringRunRequest) -> Result<RecurringRunRecord, PodflowError>;

    /// Deletes a recurring run.
    async fn delete_recurring_run(&self, id: &str) -> Result<(), PodflowError>;
}
