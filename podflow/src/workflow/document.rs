//! Argo `Workflow` document types.
//!
//! Only the subset of the Argo schema the compiler emits is modelled. Field
//! names follow the Kubernetes camelCase spelling on output.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{TolerationConfig, VolumeDefinition};

/// Argo API version.
pub const API_VERSION: &str = "argoproj.io/v1alpha1";

/// Argo workflow kind.
pub const KIND: &str = "Workflow";

/// Service account Kubeflow Pipelines runs workflows under.
pub const SERVICE_ACCOUNT: &str = "pipeline-runner";

/// Workflow annotation carrying the pipeline signature.
pub const PIPELINE_SPEC_ANNOTATION: &str = "pipelines.kubeflow.org/pipeline_spec";

/// A complete workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Always [`API_VERSION`].
    pub api_version: String,
    /// Always [`KIND`].
    pub kind: String,
    /// Metadata.
    pub metadata: WorkflowMetadata,
    /// Spec.
    pub spec: WorkflowSpec,
}

impl Workflow {
    /// Looks up a template by name.
    #[must_use]
    pub fn template(&self, name: &str) -> Option<&Template> {
        self.spec.templates.iter().find(|t| t.name == name)
    }

    /// Returns the entrypoint DAG.
    #[must_use]
    pub fn entrypoint_dag(&self) -> Option<&Dag> {
        self.template(&self.spec.entrypoint).and_then(|t| t.dag.as_ref())
    }
}

/// Workflow metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    /// Name prefix; the backend appends a random suffix.
    pub generate_name: String,
    /// Annotations.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Workflow spec.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    /// Template run first.
    pub entrypoint: String,
    /// Run-level parameters.
    pub arguments: Arguments,
    /// Templates, entrypoint first.
    pub templates: Vec<Template>,
    /// Service account.
    pub service_account_name: String,
    /// Garbage collection of finished workflows.
    pub ttl_strategy: TtlStrategy,
    /// Template run after the DAG whatever its outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<String>,
}

/// Parameters passed to a workflow or task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Arguments {
    /// Parameters.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
}

impl Arguments {
    /// Returns true if nothing is passed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// A named parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    /// Name.
    pub name: String,
    /// Literal or templated value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Where an output parameter is read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueFrom>,
}

impl Parameter {
    /// A parameter with a value.
    #[must_use]
    pub fn valued(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    /// A declared input without a value.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: None,
        }
    }

    /// An output parameter read from a file.
    #[must_use]
    pub fn from_path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(ValueFrom { path: path.into() }),
        }
    }
}

/// Source of an output parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueFrom {
    /// File inside the container.
    pub path: String,
}

/// Workflow garbage collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TtlStrategy {
    /// Seconds after completion.
    pub seconds_after_completion: u64,
}

/// One template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Name.
    pub name: String,
    /// Template annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TemplateMetadata>,
    /// Declared inputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Inputs>,
    /// Declared outputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Outputs>,
    /// Container to run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
    /// Kubernetes resource to act on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceAction>,
    /// DAG of tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dag: Option<Dag>,
    /// Volumes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeDefinition>,
    /// Tolerations.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<TolerationConfig>,
    /// Node selector.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Retries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_strategy: Option<RetryStrategy>,
}

impl Template {
    /// A template with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: None,
            inputs: None,
            outputs: None,
            container: None,
            resource: None,
            dag: None,
            volumes: Vec::new(),
            tolerations: Vec::new(),
            node_selector: BTreeMap::new(),
            retry_strategy: None,
        }
    }

    /// Returns an annotation value.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.annotations.get(key))
            .map(String::as_str)
    }
}

/// Template metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateMetadata {
    /// Annotations.
    pub annotations: BTreeMap<String, String>,
}

/// Template inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Inputs {
    /// Parameters.
    pub parameters: Vec<Parameter>,
}

/// Template outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Outputs {
    /// Parameters.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    /// Artifacts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl Outputs {
    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.artifacts.is_empty()
    }
}

/// An output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Name.
    pub name: String,
    /// File or directory inside the container.
    pub path: String,
}

/// A container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Image.
    pub image: String,
    /// Pull policy.
    pub image_pull_policy: String,
    /// Command.
    pub command: Vec<String>,
    /// Arguments.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvEntry>,
    /// Compute resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Security context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    /// Mounts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMountEntry>,
}

/// An environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvEntry {
    /// Name.
    pub name: String,
    /// Value.
    pub value: String,
}

/// Limits and requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRequirements {
    /// Limits.
    pub limits: BTreeMap<String, String>,
    /// Requests.
    pub requests: BTreeMap<String, String>,
}

/// Container security context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    /// User id.
    pub run_as_user: i64,
}

/// A volume mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMountEntry {
    /// Volume name.
    pub name: String,
    /// Mount path.
    pub mount_path: String,
}

/// A Kubernetes resource action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceAction {
    /// Action, e.g. `create`.
    pub action: String,
    /// Manifest as YAML.
    pub manifest: String,
}

/// A DAG.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Dag {
    /// Tasks in execution order.
    pub tasks: Vec<DagTask>,
}

impl Dag {
    /// Looks up a task by name.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<&DagTask> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// A DAG task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DagTask {
    /// Name.
    pub name: String,
    /// Template it runs.
    pub template: String,
    /// Tasks that must finish first, sorted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Parameters passed to the template.
    #[serde(skip_serializing_if = "Arguments::is_empty")]
    pub arguments: Arguments,
}

/// Retry strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStrategy {
    /// Retries after the first attempt.
    pub limit: u32,
    /// When to retry.
    pub retry_policy: String,
    /// Delay between attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
}

/// Retry backoff.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Backoff {
    /// Initial delay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Growth factor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
    /// Cap on the delay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<String>,
}

/// Claim manifest embedded in the volume-claim resource template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClaimManifest {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub metadata: ClaimMetadata,
    pub spec: ClaimSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ClaimMetadata {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClaimSpec {
    pub access_modes: Vec<crate::config::AccessMode>,
    pub resources: ClaimResources,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ClaimResources {
    pub requests: BTreeMap<String, String>,
}
