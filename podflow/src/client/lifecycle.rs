//! Pipeline lifecycle client.
//!
//! Drives one logical pipeline, identified by name, through the backend:
//! upload as a new pipeline or a new version, one-off runs and recurring
//! runs. Every remote step goes through [`PipelineBackend`].

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{ExperimentRecord, ExperimentSpec, PipelineBackend, PipelineRecord, RecurringRunRequest, RunRequest};
use super::run_status::{RunOutcome, RunStatus};
use crate::compiler::{sanitize_name, ExecutionGraph};
use crate::errors::PodflowError;
use crate::workflow::render;

/// Page size of [`PipelineClient::list_pipelines`].
pub const LIST_PAGE_SIZE: usize = 30;

/// Longest version name the backend accepts.
pub const MAX_VERSION_NAME_LEN: usize = 100;

/// Default delay between run status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// One-off run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Experiment the run is filed under; created when missing.
    pub experiment: ExperimentSpec,
    /// Run name.
    pub run_name: String,
    /// Parameter values overriding the compiled defaults.
    pub parameters: BTreeMap<String, String>,
    /// Block until the run finishes.
    pub wait: bool,
    /// Upper bound on the wait.
    pub timeout: Duration,
}

impl RunOptions {
    /// Creates options that do not wait.
    #[must_use]
    pub fn new(experiment: ExperimentSpec, run_name: impl Into<String>) -> Self {
        Self {
            experiment,
            run_name: run_name.into(),
            parameters: BTreeMap::new(),
            wait: false,
            timeout: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Waits for completion, at most `timeout`.
    #[must_use]
    pub fn with_wait(mut self, timeout: Duration) -> Self {
        self.wait = true;
        self.timeout = timeout;
        self
    }

    /// Sets the parameter overrides.
    #[must_use]
    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Recurring run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Experiment the runs are filed under; created when missing.
    pub experiment: ExperimentSpec,
    /// Cron expression.
    pub cron: String,
    /// Display name; `"<pipeline> on <cron>"` when absent.
    pub run_name: Option<String>,
}

impl ScheduleOptions {
    /// Creates schedule settings.
    #[must_use]
    pub fn new(experiment: ExperimentSpec, cron: impl Into<String>) -> Self {
        Self {
            experiment,
            cron: cron.into(),
            run_name: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_run_name(mut self, run_name: Option<String>) -> Self {
        self.run_name = run_name;
        self
    }
}

/// Result of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Pipeline id.
    pub pipeline_id: String,
    /// Id of the version just created.
    pub version_id: String,
    /// True when the pipeline itself was created.
    pub created: bool,
    /// UI link to the version.
    pub link: String,
}

/// Result of a schedule call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOutcome {
    /// Pipeline the schedule runs.
    pub pipeline_id: String,
    /// The new recurring run.
    pub recurring_run_id: String,
    /// Recurring runs removed first.
    pub deleted: Vec<String>,
}

/// Pipeline lifecycle operations over a backend.
#[derive(Debug)]
pub struct PipelineClient<B> {
    backend: B,
    host: String,
    poll_interval: Duration,
}

impl<B: PipelineBackend> PipelineClient<B> {
    /// Creates a client. `host` is used for UI links.
    #[must_use]
    pub fn new(backend: B, host: impl Into<String>) -> Self {
        Self {
            backend,
            host: host.into().trim_end_matches('/').to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the delay between run status polls.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Renders the first page of pipelines as a `Name`/`ID` table.
    pub async fn list_pipelines(&self) -> Result<String, PodflowError> {
        let pipelines = self.backend.list_pipelines(LIST_PAGE_SIZE).await?;
        Ok(pipeline_table(&pipelines))
    }

    /// Uploads `graph` under `pipeline_name`: a new pipeline when the name is
    /// unknown, a new version otherwise.
    pub async fn upload(&self, graph: &ExecutionGraph, pipeline_name: &str) -> Result<UploadOutcome, PodflowError> {
        if !self.backend.supports_versioning() {
            return Err(PodflowError::unsupported("upload", self.backend.name()));
        }
        let document = render(graph)?.to_yaml()?;

        let outcome = match self.backend.find_pipeline(pipeline_name).await? {
            Some(existing) => {
                let version = self
                    .backend
                    .upload_pipeline_version(&existing.id, &version_name(pipeline_name), &document)
                    .await?;
                info!(pipeline = %pipeline_name, version_id = %version.id, "New version of pipeline created");
                self.outcome(existing.id, version.id, false)
            }
            None => {
                let created = self.backend.upload_pipeline(pipeline_name, &document).await?;
                info!(pipeline = %pipeline_name, pipeline_id = %created.id, "Pipeline created");
                let version_id = created.default_version_id.clone().unwrap_or_else(|| created.id.clone());
                self.outcome(created.id, version_id, true)
            }
        };

        info!(link = %outcome.link, "Pipeline link");
        Ok(outcome)
    }

    /// Submits `graph` as a one-off run and optionally waits for it.
    ///
    /// A wait that runs out is reported as [`RunStatus::Error`], not as an
    /// error.
    pub async fn run_once(&self, graph: &ExecutionGraph, options: &RunOptions) -> Result<RunOutcome, PodflowError> {
        let experiment = self.ensure_experiment(&options.experiment).await?;
        let request = RunRequest {
            experiment_id: experiment.id,
            name: options.run_name.clone(),
            workflow_manifest: render(graph)?.to_json()?,
            parameters: options.parameters.clone(),
        };
        let run = self.backend.create_run(&request).await?;
        info!(run_id = %run.id, run_name = %run.name, "Run submitted");

        if !options.wait {
            return Ok(RunOutcome::submitted(run.id));
        }
        self.wait_for_run(run.id, options.timeout).await
    }

    /// Polls `run_id` until it reaches a terminal status or `timeout` passes.
    /// A timeout too large to represent waits without a deadline.
    pub async fn wait_for_run(&self, run_id: String, timeout: Duration) -> Result<RunOutcome, PodflowError> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let run = self.backend.get_run(&run_id).await?;
            let status = RunStatus::from_backend(run.status.as_deref());
            debug!(run_id = %run_id, status = %status, "Run polled");
            if status.is_terminal() {
                info!(run_id = %run_id, status = %status, "Run finished");
                return Ok(RunOutcome {
                    run_id,
                    status: Some(status),
                    error: run.error,
                });
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    warn!(run_id = %run_id, timeout_secs = timeout.as_secs(), "Run did not finish in time");
                    return Ok(RunOutcome {
                        run_id,
                        status: Some(RunStatus::Error),
                        error: Some(format!("run did not finish within {}s", timeout.as_secs())),
                    });
                }
                Some(deadline) => self.poll_interval.min(deadline - now),
                None => self.poll_interval,
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Replaces the recurring runs of `pipeline_name` with one running on
    /// `options.cron`.
    ///
    /// Existing recurring runs targeting the pipeline are deleted before the
    /// new one is created. If creation fails after that, the pipeline is
    /// left without a schedule. When the pipeline does not exist yet, `graph`
    /// is uploaded first.
    pub async fn schedule(
        &self,
        graph: &ExecutionGraph,
        pipeline_name: &str,
        options: &ScheduleOptions,
    ) -> Result<ScheduleOutcome, PodflowError> {
        let experiment = self.ensure_experiment(&options.experiment).await?;
        let pipeline_id = match self.backend.find_pipeline(pipeline_name).await? {
            Some(PipelineRecord { id, .. }) => id,
            None => self.upload(graph, pipeline_name).await?.pipeline_id,
        };

        let mut deleted = Vec::new();
        for job in self.backend.list_recurring_runs(&experiment.id).await? {
            if job.pipeline_id.as_deref() != Some(pipeline_id.as_str()) {
                continue;
            }
            self.backend.delete_recurring_run(&job.id).await?;
            info!(recurring_run_id = %job.id, "Previous schedule deleted");
            deleted.push(job.id);
        }

        let request = RecurringRunRequest {
            experiment_id: experiment.id,
            pipeline_id: pipeline_id.clone(),
            name: options
                .run_name
                .clone()
                .unwrap_or_else(|| format!("{pipeline_name} on {}", options.cron)),
            cron: options.cron.clone(),
            max_concurrency: 1,
            enabled: true,
        };
        let created = match self.backend.create_recurring_run(&request).await {
            Ok(created) => created,
            Err(err) => {
                warn!(
                    pipeline = %pipeline_name,
                    deleted = deleted.len(),
                    error = %err,
                    "Schedule creation failed; pipeline has no schedule"
                );
                return Err(err);
            }
        };
        info!(pipeline = %pipeline_name, cron = %options.cron, "Pipeline scheduled");

        Ok(ScheduleOutcome {
            pipeline_id,
            recurring_run_id: created.id,
            deleted,
        })
    }

    /// Finds the experiment or creates it.
    pub async fn ensure_experiment(&self, spec: &ExperimentSpec) -> Result<ExperimentRecord, PodflowError> {
        if let Some(existing) = self.backend.find_experiment(spec).await? {
            info!(experiment_id = %existing.id, "Existing experiment found");
            return Ok(existing);
        }
        let created = self.backend.create_experiment(spec).await?;
        info!(experiment_id = %created.id, "New experiment created");
        Ok(created)
    }

    fn outcome(&self, pipeline_id: String, version_id: String, created: bool) -> UploadOutcome {
        UploadOutcome {
            link: format!("{}/#/pipelines/details/{pipeline_id}/version/{version_id}", self.host),
            pipeline_id,
            version_id,
            created,
        }
    }
}

/// Version name: sanitized pipeline name plus a random suffix.
#[must_use]
pub fn version_name(pipeline_name: &str) -> String {
    let mut name = format!("{}-{}", sanitize_name(pipeline_name), Uuid::new_v4());
    name.truncate(MAX_VERSION_NAME_LEN);
    name
}

/// Two-column `Name`/`ID` table.
#[must_use]
pub fn pipeline_table(pipelines: &[PipelineRecord]) -> String {
    let name_width = pipelines
        .iter()
        .map(|p| p.name.chars().count())
        .chain(std::iter::once("Name".len()))
        .max()
        .unwrap_or(0);
    let id_width = pipelines
        .iter()
        .map(|p| p.id.chars().count())
        .chain(std::iter::once("ID".len()))
        .max()
        .unwrap_or(0);

    let mut lines = Vec::with_capacity(pipelines.len() + 2);
    lines.push(format!("{:<name_width$}  {:<id_width$}", "Name", "ID"));
    lines.push(format!("{}  {}", "-".repeat(name_width), "-".repeat(id_width)));
    for pipeline in pipelines {
        lines.push(format!("{:<name_width$}  {:<id_width$}", pipeline.name, pipeline.id));
    }
    lines
        .into_iter()
        .map(|line| line.trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::backend::{MockPipelineBackend, RecurringRunRecord, RunRecord};
    use crate::errors::BackendError;
    use crate::testing::{fixtures, InMemoryBackend};
    use pretty_assertions::assert_eq;

    fn client(backend: InMemoryBackend) -> PipelineClient<InMemoryBackend> {
        PipelineClient::new(backend, "https://kf.example.com/pipeline/")
            .with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_upload_twice_creates_version() {
        let client = client(InMemoryBackend::new());
        let graph = fixtures::execution_graph();

        let first = client.upload(&graph, "my-project").await.unwrap();
        assert!(first.created);
        assert_eq!(client.backend().version_count("my-project"), 1);

        let second = client.upload(&graph, "my-project").await.unwrap();
        assert!(!second.created);
        assert_eq!(second.pipeline_id, first.pipeline_id);
        assert_ne!(second.version_id, first.version_id);
        assert_eq!(client.backend().version_count("my-project"), 2);
        assert_eq!(
            second.link,
            format!(
                "https://kf.example.com/pipeline/#/pipelines/details/{}/version/{}",
                second.pipeline_id, second.version_id
            )
        );
    }

    #[tokio::test]
    async fn test_upload_unsupported() {
        let client = client(InMemoryBackend::new().without_versioning());
        let err = client
            .upload(&fixtures::execution_graph(), "my-project")
            .await
            .unwrap_err();
        assert!(matches!(err, PodflowError::Unsupported { .. }));
        assert_eq!(client.backend().version_count("my-project"), 0);
    }

    #[tokio::test]
    async fn test_schedule_replaces_existing() {
        let backend = InMemoryBackend::new();
        let client = client(backend);
        let graph = fixtures::execution_graph();
        let experiment = ExperimentSpec::new("exp");

        let pipeline_id = client.upload(&graph, "my-project").await.unwrap().pipeline_id;
        let experiment_id = client.ensure_experiment(&experiment).await.unwrap().id;
        for _ in 0..3 {
            client.backend().seed_recurring_run(&experiment_id, &pipeline_id);
        }
        client.backend().seed_recurring_run(&experiment_id, "other-pipeline");

        let outcome = client
            .schedule(&graph, "my-project", &ScheduleOptions::new(experiment, "0 * * * *"))
            .await
            .unwrap();

        assert_eq!(outcome.deleted.len(), 3);
        let remaining = client.backend().recurring_runs_for(&pipeline_id);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, outcome.recurring_run_id);
        assert_eq!(remaining[0].name, "my-project on 0 * * * *");
        assert!(remaining[0].enabled);
        assert_eq!(client.backend().recurring_runs_for("other-pipeline").len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_uploads_missing_pipeline() {
        let client = client(InMemoryBackend::new());
        let options = ScheduleOptions::new(ExperimentSpec::new("exp"), "0 0 * * *")
            .with_run_name(Some("nightly".to_string()));

        let outcome = client
            .schedule(&fixtures::execution_graph(), "fresh", &options)
            .await
            .unwrap();

        assert_eq!(client.backend().version_count("fresh"), 1);
        assert!(outcome.deleted.is_empty());
        assert_eq!(client.backend().recurring_runs_for(&outcome.pipeline_id)[0].name, "nightly");
    }

    #[tokio::test]
    async fn test_schedule_failure_leaves_no_schedule() {
        let backend = InMemoryBackend::new();
        let client = client(backend);
        let graph = fixtures::execution_graph();
        let experiment = ExperimentSpec::new("exp");
        let pipeline_id = client.upload(&graph, "p").await.unwrap().pipeline_id;
        let experiment_id = client.ensure_experiment(&experiment).await.unwrap().id;
        client.backend().seed_recurring_run(&experiment_id, &pipeline_id);
        client.backend().fail_recurring_run_creation();

        let err = client
            .schedule(&graph, "p", &ScheduleOptions::new(experiment, "* * * * *"))
            .await
            .unwrap_err();

        assert!(matches!(err, PodflowError::Backend(_)));
        assert!(client.backend().recurring_runs_for(&pipeline_id).is_empty());
    }

    #[tokio::test]
    async fn test_run_once_without_wait() {
        let client = client(InMemoryBackend::new());
        let outcome = client
            .run_once(
                &fixtures::execution_graph(),
                &RunOptions::new(ExperimentSpec::new("exp"), "run"),
            )
            .await
            .unwrap();

        assert!(outcome.status.is_none());
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(client.backend().experiment_names(), vec!["exp".to_string()]);
        assert_eq!(client.backend().submitted_runs().len(), 1);
    }

    #[tokio::test]
    async fn test_run_once_waits_for_terminal_status() {
        let client = client(InMemoryBackend::new().with_run_statuses(["Pending", "Running", "Failed"]));
        let outcome = client
            .run_once(
                &fixtures::execution_graph(),
                &RunOptions::new(ExperimentSpec::new("exp"), "run").with_wait(Duration::from_secs(10)),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, Some(RunStatus::Failed));
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_run_once_timeout_is_error_status() {
        let client = client(InMemoryBackend::new().with_run_statuses(["Running"]));
        let outcome = client
            .run_once(
                &fixtures::execution_graph(),
                &RunOptions::new(ExperimentSpec::new("exp"), "run").with_wait(Duration::from_millis(20)),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, Some(RunStatus::Error));
        assert!(outcome.error.unwrap().contains("did not finish"));
    }

    #[tokio::test]
    async fn test_unbounded_timeout_waits_without_deadline() {
        let client = client(InMemoryBackend::new().with_run_statuses(["Running", "Succeeded"]));
        let outcome = client
            .run_once(
                &fixtures::execution_graph(),
                &RunOptions::new(ExperimentSpec::new("exp"), "run")
                    .with_wait(Duration::from_secs(u64::MAX)),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, Some(RunStatus::Succeeded));
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_run_once_reuses_experiment() {
        let mut backend = MockPipelineBackend::new();
        backend
            .expect_find_experiment()
            .returning(|spec| Ok(Some(ExperimentRecord { id: "e-1".to_string(), name: spec.name.clone() })));
        backend.expect_create_experiment().never();
        backend
            .expect_create_run()
            .withf(|request| request.experiment_id == "e-1" && request.name == "nightly")
            .times(1)
            .returning(|request| {
                Ok(RunRecord {
                    id: "r-1".to_string(),
                    name: request.name.clone(),
                    status: None,
                    error: None,
                    created_at: None,
                    finished_at: None,
                })
            });

        let client = PipelineClient::new(backend, "http://localhost");
        let outcome = client
            .run_once(
                &fixtures::execution_graph(),
                &RunOptions::new(ExperimentSpec::new("exp"), "nightly"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.run_id, "r-1");
    }

    #[tokio::test]
    async fn test_schedule_delete_failure_propagates() {
        let mut backend = MockPipelineBackend::new();
        backend
            .expect_find_experiment()
            .returning(|_| Ok(Some(ExperimentRecord { id: "e-1".to_string(), name: "exp".to_string() })));
        backend.expect_find_pipeline().withf(|name| name == "p").returning(|_| {
            Ok(Some(PipelineRecord {
                id: "p-1".to_string(),
                name: "p".to_string(),
                default_version_id: None,
                created_at: None,
            }))
        });
        backend.expect_list_recurring_runs().returning(|_| {
            Ok(vec![RecurringRunRecord {
                id: "j-1".to_string(),
                name: "old".to_string(),
                pipeline_id: Some("p-1".to_string()),
                cron: None,
                enabled: true,
            }])
        });
        backend.expect_delete_recurring_run().returning(|_| {
            Err(BackendError::Http {
                status: 403,
                body: "forbidden".to_string(),
            }
            .into())
        });
        backend.expect_create_recurring_run().never();

        let client = PipelineClient::new(backend, "http://localhost");
        let err = client
            .schedule(
                &fixtures::execution_graph(),
                "p",
                &ScheduleOptions::new(ExperimentSpec::new("exp"), "0 * * * *"),
            )
            .await
            .unwrap_err();
        let PodflowError::Backend(err) = err else {
            panic!("expected a backend error");
        };
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn test_version_name() {
        let name = version_name("My Project");
        assert!(name.starts_with("my-project-"));
        assert_eq!(name.len(), "my-project-".len() + 36);

        let long = version_name(&"x".repeat(90));
        assert_eq!(long.len(), MAX_VERSION_NAME_LEN);
    }

    #[test]
    fn test_pipeline_table() {
        let table = pipeline_table(&[
            PipelineRecord {
                id: "p-1".to_string(),
                name: "first".to_string(),
                default_version_id: None,
                created_at: None,
            },
            PipelineRecord {
                id: "p-22".to_string(),
                name: "second-pipeline".to_string(),
                default_version_id: None,
                created_at: None,
            },
        ]);

        assert_eq!(
            table,
            "Name             ID\n\
             ---------------  ----\n\
             first            p-1\n\
             second-pipeline  p-22"
        );
    }
}
