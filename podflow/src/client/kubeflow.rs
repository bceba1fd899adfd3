//! Kubeflow Pipelines REST backend (`/apis/v1beta1`).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::backend::{
    ExperimentRecord, ExperimentSpec, PipelineBackend, PipelineRecord, PipelineVersionRecord,
    RecurringRunRecord, RecurringRunRequest, RunRecord, RunRequest,
};
use super::credentials::Credentials;
use crate::errors::{BackendError, PodflowError};

const API_PREFIX: &str = "/apis/v1beta1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const JOB_PAGE_SIZE: usize = 100;

/// Kubeflow Pipelines v1 API client.
#[derive(Debug, Clone)]
pub struct KubeflowBackend {
    client: Client,
    host: String,
    credentials: Credentials,
}

impl KubeflowBackend {
    /// Creates a client for `host`, e.g. `https://kubeflow.example.com/pipeline`.
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Result<Self, PodflowError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Returns the host without a trailing slash.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.host)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.credentials.apply(self.client.request(method, self.url(path)))
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, PodflowError> {
        let response = checked(request.send().await?).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| BackendError::Decode(e.to_string()).into())
    }

    fn upload_form(document: &str) -> Result<Form, PodflowError> {
        let part = Part::text(document.to_string())
            .file_name("pipeline.yaml")
            .mime_str("application/x-yaml")?;
        Ok(Form::new().part("uploadfile", part))
    }
}

async fn checked(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Http {
        status: status.as_u16(),
        body,
    })
}

fn name_filter(name: &str) -> String {
    json!({
        "predicates": [{"key": "name", "op": "EQUALS", "string_value": name}]
    })
    .to_string()
}

fn owner_reference(kind: &str, id: &str) -> Value {
    json!({"key": {"type": kind, "id": id}, "relationship": "OWNER"})
}

#[derive(Debug, Default, Deserialize)]
struct ApiPipelineList {
    #[serde(default)]
    pipelines: Vec<ApiPipeline>,
}

#[derive(Debug, Deserialize)]
struct ApiPipeline {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    default_version: Option<ApiVersion>,
}

impl From<ApiPipeline> for PipelineRecord {
    fn from(api: ApiPipeline) -> Self {
        Self {
            id: api.id,
            name: api.name,
            default_version_id: api.default_version.map(|v| v.id),
            created_at: api.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiVersion {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiExperimentList {
    #[serde(default)]
    experiments: Vec<ApiExperiment>,
}

#[derive(Debug, Deserialize)]
struct ApiExperiment {
    id: String,
    #[serde(default)]
    name: String,
}

impl From<ApiExperiment> for ExperimentRecord {
    fn from(api: ApiExperiment) -> Self {
        Self {
            id: api.id,
            name: api.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiRunDetail {
    run: ApiRun,
}

#[derive(Debug, Deserialize)]
struct ApiRun {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
}

impl From<ApiRun> for RunRecord {
    fn from(api: ApiRun) -> Self {
        Self {
            id: api.id,
            name: api.name,
            status: api.status.filter(|s| !s.is_empty()),
            error: api.error.filter(|e| !e.is_empty()),
            created_at: api.created_at,
            finished_at: api.finished_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiJobList {
    #[serde(default)]
    jobs: Vec<ApiJob>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiJob {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    pipeline_spec: Option<ApiJobPipelineSpec>,
    #[serde(default)]
    trigger: Option<ApiTrigger>,
    #[serde(default)]
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct ApiJobPipelineSpec {
    #[serde(default)]
    pipeline_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTrigger {
    #[serde(default)]
    cron_schedule: Option<ApiCronSchedule>,
}

#[derive(Debug, Deserialize)]
struct ApiCronSchedule {
    #[serde(default)]
    cron: Option<String>,
}

impl From<ApiJob> for RecurringRunRecord {
    fn from(api: ApiJob) -> Self {
        Self {
            id: api.id,
            name: api.name,
            pipeline_id: api
                .pipeline_spec
                .and_then(|s| s.pipeline_id)
                .filter(|id| !id.is_empty()),
            cron: api.trigger.and_then(|t| t.cron_schedule).and_then(|c| c.cron),
            enabled: api.enabled,
        }
    }
}

#[async_trait]
impl PipelineBackend for KubeflowBackend {
    fn name(&self) -> &'static str {
        "Kubeflow Pipelines"
    }

    fn supports_versioning(&self) -> bool {
        true
    }

    async fn find_pipeline(&self, name: &str) -> Result<Option<PipelineRecord>, PodflowError> {
        let request = self
            .request(Method::GET, "/pipelines")
            .query(&[("filter", name_filter(name))]);
        let list: ApiPipelineList = Self::send(request).await?;
        Ok(list.pipelines.into_iter().next().map(Into::into))
    }

    async fn list_pipelines(&self, page_size: usize) -> Result<Vec<PipelineRecord>, PodflowError> {
        let request = self
            .request(Method::GET, "/pipelines")
            .query(&[("page_size", page_size.to_string())]);
        let list: ApiPipelineList = Self::send(request).await?;
        Ok(list.pipelines.into_iter().map(Into::into).collect())
    }

    async fn upload_pipeline(&self, name: &str, document: &str) -> Result<PipelineRecord, PodflowError> {
        let request = self
            .request(Method::POST, "/pipelines/upload")
            .query(&[("name", name)])
            .multipart(Self::upload_form(document)?);
        let pipeline: ApiPipeline = Self::send(request).await?;
        debug!(pipeline_id = %pipeline.id, "Pipeline uploaded");
        Ok(pipeline.into())
    }

    async fn upload_pipeline_version(
        &self,
        pipeline_id: &str,
        version_name: &str,
        document: &str,
    ) -> Result<PipelineVersionRecord, PodflowError> {
        let request = self
            .request(Method::POST, "/pipelines/upload_version")
            .query(&[("name", version_name), ("pipelineid", pipeline_id)])
            .multipart(Self::upload_form(document)?);
        let version: ApiVersion = Self::send(request).await?;
        Ok(PipelineVersionRecord {
            id: version.id,
            name: version.name,
            created_at: version.created_at,
        })
    }

    async fn find_experiment(&self, spec: &ExperimentSpec) -> Result<Option<ExperimentRecord>, PodflowError> {
        let mut request = self
            .request(Method::GET, "/experiments")
            .query(&[("filter", name_filter(&spec.name))]);
        if let Some(namespace) = &spec.namespace {
            request = request.query(&[
                ("resource_reference_key.type", "NAMESPACE"),
                ("resource_reference_key.id", namespace.as_str()),
            ]);
        }
        let list: ApiExperimentList = Self::send(request).await?;
        Ok(list.experiments.into_iter().next().map(Into::into))
    }

    async fn create_experiment(&self, spec: &ExperimentSpec) -> Result<ExperimentRecord, PodflowError> {
        let mut body = json!({"name": spec.name});
        if let Some(namespace) = &spec.namespace {
            body["resource_references"] = json!([owner_reference("NAMESPACE", namespace)]);
        }
        let request = self.request(Method::POST, "/experiments").json(&body);
        let experiment: ApiExperiment = Self::send(request).await?;
        Ok(experiment.into())
    }

    async fn create_run(&self, request: &RunRequest) -> Result<RunRecord, PodflowError> {
        let parameters: Vec<Value> = request
            .parameters
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect();
        let body = json!({
            "name": request.name,
            "pipeline_spec": {
                "workflow_manifest": request.workflow_manifest,
                "parameters": parameters,
            },
            "resource_references": [owner_reference("EXPERIMENT", &request.experiment_id)],
        });
        let detail: ApiRunDetail = Self::send(self.request(Method::POST, "/runs").json(&body)).await?;
        Ok(detail.run.into())
    }

    async fn get_run(&self, run_id: &str) -> Result<RunRecord, PodflowError> {
        let detail: ApiRunDetail =
            Self::send(self.request(Method::GET, &format!("/runs/{run_id}"))).await?;
        Ok(detail.run.into())
    }

    async fn list_recurring_runs(&self, experiment_id: &str) -> Result<Vec<RecurringRunRecord>, PodflowError> {
        let mut jobs = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.request(Method::GET, "/jobs").query(&[
                ("resource_reference_key.type", "EXPERIMENT"),
                ("resource_reference_key.id", experiment_id),
            ]);
            request = request.query(&[("page_size", JOB_PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("page_token", token.as_str())]);
            }
            let page: ApiJobList = Self::send(request).await?;
            jobs.extend(page.jobs.into_iter().map(RecurringRunRecord::from));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(jobs)
    }

    async fn create_recurring_run(&self, request: &RecurringRunRequest) -> Result<RecurringRunRecord, PodflowError> {
        let body = json!({
            "name": request.name,
            "pipeline_spec": {"pipeline_id": request.pipeline_id},
            "resource_references": [owner_reference("EXPERIMENT", &request.experiment_id)],
            "trigger": {"cron_schedule": {"cron": request.cron}},
            "max_concurrency": request.max_concurrency.to_string(),
            "enabled": request.enabled,
        });
        let job: ApiJob = Self::send(self.request(Method::POST, "/jobs").json(&body)).await?;
        Ok(job.into())
    }

    async fn delete_recurring_run(&self, id: &str) -> Result<(), PodflowError> {
        let response = self
            .request(Method::DELETE, &format!("/jobs/{id}"))
            .send()
            .await?;
        checked(response).await?;
        Ok(())
    }
}
