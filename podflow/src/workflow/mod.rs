//! Backend workflow documents.
//!
//! Execution graphs are rendered as Argo `Workflow` documents in the shape
//! Kubeflow Pipelines v1 accepts for upload and run submission.

mod document;
mod render;

pub use document::{
    Arguments, Artifact, Backoff, Container, Dag, DagTask, EnvEntry, Inputs, Outputs, Parameter,
    ResourceAction, ResourceRequirements, RetryStrategy, SecurityContext, Template,
    TemplateMetadata, TtlStrategy, ValueFrom, VolumeMountEntry, Workflow, WorkflowMetadata,
    WorkflowSpec, API_VERSION, KIND, PIPELINE_SPEC_ANNOTATION, SERVICE_ACCOUNT,
};
pub use render::{output_parameter_name, render};
