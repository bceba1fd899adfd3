//! In-memory pipeline backend.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

use crate::client::{
    ExperimentRecord, ExperimentSpec, PipelineBackend, PipelineRecord, PipelineVersionRecord,
    RecurringRunRecord, RecurringRunRequest, RunRecord, RunRequest,
};
use crate::errors::{BackendError, PodflowError};

#[derive(Debug)]
struct StoredPipeline {
    record: PipelineRecord,
    versions: Vec<PipelineVersionRecord>,
    documents: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    pipelines: Vec<StoredPipeline>,
    experiments: Vec<(ExperimentSpec, ExperimentRecord)>,
    runs: BTreeMap<String, RunRecord>,
    submitted: Vec<RunRequest>,
    run_statuses: VecDeque<String>,
    recurring: Vec<(String, RecurringRunRecord)>,
    fail_recurring_create: bool,
}

/// A backend that keeps everything in memory.
///
/// Runs report the scripted statuses one poll at a time and then stay on the
/// last one.
#[derive(Debug)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    versioning: bool,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Creates an empty backend whose runs succeed immediately.
    #[must_use]
    pub fn new() -> Self {
        let mut state = State::default();
        state.run_statuses.push_back("Succeeded".to_string());
        Self {
            state: Mutex::new(state),
            versioning: true,
        }
    }

    /// Reports no versioning support.
    #[must_use]
    pub fn without_versioning(mut self) -> Self {
        self.versioning = false;
        self
    }

    /// Scripts the statuses returned by successive run polls.
    #[must_use]
    pub fn with_run_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.state.lock();
            state.run_statuses = statuses.into_iter().map(Into::into).collect();
        }
        self
    }

    /// Makes every later recurring run creation fail.
    pub fn fail_recurring_run_creation(&self) {
        self.state.lock().fail_recurring_create = true;
    }

    /// Adds a recurring run without going through the client.
    pub fn seed_recurring_run(&self, experiment_id: &str, pipeline_id: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.state.lock().recurring.push((
            experiment_id.to_string(),
            RecurringRunRecord {
                id: id.clone(),
                name: format!("seeded {id}"),
                pipeline_id: Some(pipeline_id.to_string()),
                cron: None,
                enabled: true,
            },
        ));
        id
    }

    /// Number of versions of the pipeline `name`; zero when unknown.
    #[must_use]
    pub fn version_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .pipelines
            .iter()
            .find(|p| p.record.name == name)
            .map_or(0, |p| p.versions.len())
    }

    /// Last document uploaded for the pipeline `name`.
    #[must_use]
    pub fn latest_document(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .pipelines
            .iter()
            .find(|p| p.record.name == name)
            .and_then(|p| p.documents.last().cloned())
    }

    /// Recurring runs targeting `pipeline_id`.
    #[must_use]
    pub fn recurring_runs_for(&self, pipeline_id: &str) -> Vec<RecurringRunRecord> {
        self.state
            .lock()
            .recurring
            .iter()
            .filter(|(_, job)| job.pipeline_id.as_deref() == Some(pipeline_id))
            .map(|(_, job)| job.clone())
            .collect()
    }

    /// Names of the experiments, in creation order.
    #[must_use]
    pub fn experiment_names(&self) -> Vec<String> {
        self.state
            .lock()
            .experiments
            .iter()
            .map(|(_, e)| e.name.clone())
            .collect()
    }

    /// Every run request received.
    #[must_use]
    pub fn submitted_runs(&self) -> Vec<RunRequest> {
        self.state.lock().submitted.clone()
    }

    fn next_status(state: &mut State) -> Option<String> {
        if state.run_statuses.len() > 1 {
            state.run_statuses.pop_front()
        } else {
            state.run_statuses.front().cloned()
        }
    }
}

fn not_found(what: &str, id: &str) -> PodflowError {
    BackendError::Http {
        status: 404,
        body: format!("{what} '{id}' not found"),
    }
    .into()
}

#[async_trait]
impl PipelineBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn supports_versioning(&self) -> bool {
        self.versioning
    }

    async fn find_pipeline(&self, name: &str) -> Result<Option<PipelineRecord>, PodflowError> {
        Ok(self
            .state
            .lock()
            .pipelines
            .iter()
            .find(|p| p.record.name == name)
            .map(|p| p.record.clone()))
    }

    async fn list_pipelines(&self, page_size: usize) -> Result<Vec<PipelineRecord>, PodflowError> {
        Ok(self
            .state
            .lock()
            .pipelines
            .iter()
            .take(page_size)
            .map(|p| p.record.clone())
            .collect())
    }

    async fn upload_pipeline(&self, name: &str, document: &str) -> Result<PipelineRecord, PodflowError> {
        let mut state = self.state.lock();
        if state.pipelines.iter().any(|p| p.record.name == name) {
            return Err(BackendError::Http {
                status: 409,
                body: format!("pipeline '{name}' already exists"),
            }
            .into());
        }
        let version = PipelineVersionRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Some(Utc::now()),
        };
        let record = PipelineRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            default_version_id: Some(version.id.clone()),
            created_at: Some(Utc::now()),
        };
        state.pipelines.push(StoredPipeline {
            record: record.clone(),
            versions: vec![version],
            documents: vec![document.to_string()],
        });
        Ok(record)
    }

    async fn upload_pipeline_version(
        &self,
        pipeline_id: &str,
        version_name: &str,
        document: &str,
    ) -> Result<PipelineVersionRecord, PodflowError> {
        let mut state = self.state.lock();
        let pipeline = state
            .pipelines
            .iter_mut()
            .find(|p| p.record.id == pipeline_id)
            .ok_or_else(|| not_found("pipeline", pipeline_id))?;
        let version = PipelineVersionRecord {
            id: Uuid::new_v4().to_string(),
            name: version_name.to_string(),
            created_at: Some(Utc::now()),
        };
        pipeline.versions.push(version.clone());
        pipeline.documents.push(document.to_string());
        Ok(version)
    }

    async fn find_experiment(&self, spec: &ExperimentSpec) -> Result<Option<ExperimentRecord>, PodflowError> {
        Ok(self
            .state
            .lock()
            .experiments
            .iter()
            .find(|(key, _)| key == spec)
            .map(|(_, e)| e.clone()))
    }

    async fn create_experiment(&self, spec: &ExperimentSpec) -> Result<ExperimentRecord, PodflowError> {
        let record = ExperimentRecord {
            id: Uuid::new_v4().to_string(),
            name: spec.name.clone(),
        };
        self.state.lock().experiments.push((spec.clone(), record.clone()));
        Ok(record)
    }

    async fn create_run(&self, request: &RunRequest) -> Result<RunRecord, PodflowError> {
        let mut state = self.state.lock();
        if !state.experiments.iter().any(|(_, e)| e.id == request.experiment_id) {
            return Err(not_found("experiment", &request.experiment_id));
        }
        let record = RunRecord {
            id: Uuid::new_v4().to_string(),
            name: request.name.clone(),
            status: None,
            error: None,
            created_at: Some(Utc::now()),
            finished_at: None,
        };
        state.runs.insert(record.id.clone(), record.clone());
        state.submitted.push(request.clone());
        Ok(record)
    }

    async fn get_run(&self, run_id: &str) -> Result<RunRecord, PodflowError> {
        let mut state = self.state.lock();
        let status = Self::next_status(&mut state);
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| not_found("run", run_id))?;
        run.status = status;
        Ok(run.clone())
    }

    async fn list_recurring_runs(&self, experiment_id: &str) -> Result<Vec<RecurringRunRecord>, PodflowError> {
        Ok(self
            .state
            .lock()
            .recurring
            .iter()
            .filter(|(experiment, _)| experiment == experiment_id)
            .map(|(_, job)| job.clone())
            .collect())
    }

    async fn create_recurring_run(&self, request: &RecurringRunRequest) -> Result<RecurringRunRecord, PodflowError> {
        let mut state = self.state.lock();
        if state.fail_recurring_create {
            return Err(BackendError::Http {
                status: 500,
                body: "recurring run creation failed".to_string(),
            }
            .into());
        }
        let record = RecurringRunRecord {
            id: Uuid::new_v4().to_string(),
            name: request.name.clone(),
            pipeline_id: Some(request.pipeline_id.clone()),
            cron: Some(request.cron.clone()),
            enabled: request.enabled,
        };
        state
            .recurring
            .push((request.experiment_id.clone(), record.clone()));
        Ok(record)
    }

    async fn delete_recurring_run(&self, id: &str) -> Result<(), PodflowError> {
        let mut state = self.state.lock();
        let before = state.recurring.len();
        state.recurring.retain(|(_, job)| job.id != id);
        if state.recurring.len() == before {
            return Err(not_found("recurring run", id));
        }
        Ok(())
    }
}
