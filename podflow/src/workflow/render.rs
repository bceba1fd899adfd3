//! Execution graph to Argo workflow.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use super::document::{
    Arguments, Artifact, Backoff, ClaimManifest, ClaimMetadata, ClaimResources, ClaimSpec,
    Container, Dag, DagTask, EnvEntry, Inputs, Outputs, Parameter, ResourceAction,
    ResourceRequirements, RetryStrategy, SecurityContext, Template, TemplateMetadata, TtlStrategy,
    VolumeMountEntry, Workflow, WorkflowMetadata, WorkflowSpec, API_VERSION, KIND,
    PIPELINE_SPEC_ANNOTATION, SERVICE_ACCOUNT,
};
use crate::compiler::{
    sanitize_name, Arg, ContainerSpec, ExecutionGraph, ExecutionUnit, UnitKind, VolumeClaimSpec,
};
use crate::config::RetryPolicyConfig;
use crate::errors::PodflowError;
use crate::graph::PipelineParameter;

/// Where a template's values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// A DAG task: values arrive as template inputs.
    Dag,
    /// The exit handler: only workflow parameters are visible.
    Workflow,
}

#[derive(Serialize)]
struct PipelineSpec<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    inputs: &'a [PipelineParameter],
}

/// Name of the output parameter `output` of `unit`.
#[must_use]
pub fn output_parameter_name(unit: &str, output: &str) -> String {
    format!("{unit}-{}", sanitize_name(output))
}

/// Renders an execution graph as an Argo workflow.
pub fn render(graph: &ExecutionGraph) -> Result<Workflow, PodflowError> {
    let entrypoint = sanitize_name(&graph.metadata.name);

    let mut templates = Vec::with_capacity(graph.units.len() + 2);
    let mut tasks = Vec::with_capacity(graph.units.len());
    for unit in &graph.units {
        templates.push(unit_template(unit, Scope::Dag)?);
        tasks.push(DagTask {
            name: unit.name.clone(),
            template: unit.name.clone(),
            dependencies: unit.dependencies.iter().cloned().collect(),
            arguments: task_arguments(unit),
        });
    }

    let mut dag = Template::named(entrypoint.clone());
    dag.dag = Some(Dag { tasks });
    templates.insert(0, dag);

    let on_exit = match &graph.exit_handler {
        Some(exit) => {
            templates.push(unit_template(exit, Scope::Workflow)?);
            Some(exit.name.clone())
        }
        None => None,
    };

    let spec = serde_json::to_string(&PipelineSpec {
        name: &graph.metadata.name,
        description: graph.metadata.description.as_deref(),
        inputs: &graph.parameters,
    })?;
    let mut annotations = BTreeMap::new();
    annotations.insert(PIPELINE_SPEC_ANNOTATION.to_string(), spec);

    Ok(Workflow {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        metadata: WorkflowMetadata {
            generate_name: format!("{entrypoint}-"),
            annotations,
        },
        spec: WorkflowSpec {
            entrypoint,
            arguments: Arguments {
                parameters: graph
                    .parameters
                    .iter()
                    .map(|p| Parameter::valued(&p.name, &p.default))
                    .collect(),
            },
            templates,
            service_account_name: SERVICE_ACCOUNT.to_string(),
            ttl_strategy: TtlStrategy {
                seconds_after_completion: graph.metadata.ttl_seconds,
            },
            on_exit,
        },
    })
}

impl Workflow {
    /// Serializes to YAML.
    pub fn to_yaml(&self) -> Result<String, PodflowError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Serializes to pretty JSON.
    pub fn to_json(&self) -> Result<String, PodflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the workflow to `path`, as JSON for a `.json` extension and
    /// YAML otherwise.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), PodflowError> {
        let path = path.as_ref();
        let body = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => self.to_json()?,
            _ => self.to_yaml()?,
        };
        std::fs::write(path, body)?;
        info!(
            path = %path.display(),
            templates = self.spec.templates.len(),
            "Workflow written"
        );
        Ok(())
    }
}

fn unit_template(unit: &ExecutionUnit, scope: Scope) -> Result<Template, PodflowError> {
    let mut template = Template::named(unit.name.clone());
    if !unit.annotations.is_empty() {
        template.metadata = Some(TemplateMetadata {
            annotations: unit.annotations.clone(),
        });
    }

    match &unit.kind {
        UnitKind::Container(spec) => {
            let inputs = input_names(unit);
            if scope == Scope::Dag && !inputs.is_empty() {
                template.inputs = Some(Inputs {
                    parameters: inputs.into_iter().map(Parameter::named).collect(),
                });
            }
            template.container = Some(container(spec, scope)?);
            let outputs = outputs(&unit.name, spec);
            if !outputs.is_empty() {
                template.outputs = Some(outputs);
            }
        }
        UnitKind::VolumeClaim(claim) => {
            template.resource = Some(ResourceAction {
                action: "create".to_string(),
                manifest: claim_manifest(claim)?,
            });
        }
    }

    template.volumes.clone_from(&unit.volumes);
    template.tolerations.clone_from(&unit.tolerations);
    template.node_selector.clone_from(&unit.node_selector);
    template.retry_strategy = unit.retry_policy.as_ref().map(retry_strategy);
    Ok(template)
}

fn container(spec: &ContainerSpec, scope: Scope) -> Result<Container, PodflowError> {
    let args = spec
        .args
        .iter()
        .map(|arg| value_text(arg, scope))
        .collect::<Result<Vec<_>, _>>()?;
    let env = spec
        .env
        .iter()
        .map(|var| {
            Ok(EnvEntry {
                name: var.name.clone(),
                value: value_text(&var.value, scope)?,
            })
        })
        .collect::<Result<Vec<_>, PodflowError>>()?;

    Ok(Container {
        image: spec.image.clone(),
        image_pull_policy: spec.image_pull_policy.as_str().to_string(),
        command: spec.command.clone(),
        args,
        env,
        resources: (!spec.resources.is_empty()).then(|| ResourceRequirements {
            limits: spec.resources.clone(),
            requests: spec.resources.clone(),
        }),
        security_context: spec
            .run_as_user
            .map(|run_as_user| SecurityContext { run_as_user }),
        volume_mounts: spec
            .volume_mounts
            .iter()
            .map(|m| VolumeMountEntry {
                name: m.name.clone(),
                mount_path: m.mount_path.clone(),
            })
            .collect(),
    })
}

fn outputs(unit: &str, spec: &ContainerSpec) -> Outputs {
    Outputs {
        parameters: spec
            .output_parameters
            .iter()
            .map(|o| Parameter::from_path(output_parameter_name(unit, &o.name), &o.path))
            .collect(),
        artifacts: spec
            .output_artifacts
            .iter()
            .map(|o| Artifact {
                name: output_parameter_name(unit, &o.name),
                path: o.path.clone(),
            })
            .collect(),
    }
}

fn value_text(arg: &Arg, scope: Scope) -> Result<String, PodflowError> {
    Ok(match (arg, scope) {
        (Arg::Literal(value), _) => value.clone(),
        (Arg::Parameter(name), Scope::Dag) => format!("{{{{inputs.parameters.{name}}}}}"),
        (Arg::Parameter(name), Scope::Workflow) => format!("{{{{workflow.parameters.{name}}}}}"),
        (Arg::UnitOutput { unit, output }, Scope::Dag) => format!(
            "{{{{inputs.parameters.{}}}}}",
            output_parameter_name(unit, output)
        ),
        (Arg::UnitOutput { unit, .. }, Scope::Workflow) => {
            return Err(PodflowError::Serialization(format!(
                "the exit handler cannot read outputs of unit '{unit}'"
            )))
        }
    })
}

/// Parameters a container unit reads, in first-use order.
fn input_names(unit: &ExecutionUnit) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for arg in unit_values(unit) {
        let name = match arg {
            Arg::Literal(_) => continue,
            Arg::Parameter(name) => name.clone(),
            Arg::UnitOutput { unit, output } => output_parameter_name(unit, output),
        };
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn task_arguments(unit: &ExecutionUnit) -> Arguments {
    let mut parameters: Vec<Parameter> = Vec::new();
    for arg in unit_values(unit) {
        let parameter = match arg {
            Arg::Literal(_) => continue,
            Arg::Parameter(name) => {
                Parameter::valued(name, format!("{{{{workflow.parameters.{name}}}}}"))
            }
            Arg::UnitOutput { unit, output } => {
                let name = output_parameter_name(unit, output);
                let value = format!("{{{{tasks.{unit}.outputs.parameters.{name}}}}}");
                Parameter::valued(name, value)
            }
        };
        if parameters.iter().all(|p| p.name != parameter.name) {
            parameters.push(parameter);
        }
    }
    Arguments { parameters }
}

fn unit_values(unit: &ExecutionUnit) -> impl Iterator<Item = &Arg> {
    unit.container_spec()
        .into_iter()
        .flat_map(|spec| spec.args.iter().chain(spec.env.iter().map(|var| &var.value)))
}

fn claim_manifest(claim: &VolumeClaimSpec) -> Result<String, PodflowError> {
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), claim.size.clone());
    let manifest = ClaimManifest {
        api_version: "v1",
        kind: "PersistentVolumeClaim",
        metadata: ClaimMetadata {
            name: claim.claim_name.clone(),
        },
        spec: ClaimSpec {
            access_modes: claim.access_modes.clone(),
            resources: ClaimResources { requests },
            storage_class_name: claim.storage_class.clone(),
        },
    };
    Ok(serde_yaml::to_string(&manifest)?)
}

fn retry_strategy(policy: &RetryPolicyConfig) -> RetryStrategy {
    let has_backoff = policy.backoff_duration.is_some()
        || policy.backoff_factor.is_some()
        || policy.backoff_max_duration.is_some();
    RetryStrategy {
        limit: policy.num_retries,
        retry_policy: "Always".to_string(),
        backoff: has_backoff.then(|| Backoff {
            duration: policy.backoff_duration.clone(),
            factor: policy.backoff_factor,
            max_duration: policy.backoff_max_duration.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{PipelineCompiler, TRACKING_UNIT, VOLUME_CLAIM_UNIT};
    use crate::config::{NodeConfig, ResourceSpec, RunConfig, VolumeConfig};
    use crate::graph::{RunParameters, Task, TaskGraph};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn two_nodes() -> TaskGraph {
        TaskGraph::from_data_flow(
            "pipeline",
            [
                Task::new("node1").with_inputs(["A"]).with_outputs(["B"]),
                Task::new("node2").with_inputs(["B"]).with_outputs(["C"]),
            ],
        )
        .unwrap()
    }

    fn render_with(run_config: RunConfig, params: RunParameters) -> Workflow {
        let graph = PipelineCompiler::new("My Project", "base", run_config)
            .with_parameters(params)
            .compile(&two_nodes())
            .unwrap();
        render(&graph).unwrap()
    }

    #[test]
    fn test_workflow_shape() {
        let workflow = render_with(RunConfig::new("img", "exp", "run"), RunParameters::new());

        assert_eq!(workflow.api_version, "argoproj.io/v1alpha1");
        assert_eq!(workflow.metadata.generate_name, "my-project-");
        assert_eq!(workflow.spec.entrypoint, "my-project");
        assert_eq!(workflow.spec.service_account_name, "pipeline-runner");
        assert_eq!(workflow.spec.ttl_strategy.seconds_after_completion, 604_800);
        assert!(workflow.spec.on_exit.is_none());

        let dag = workflow.entrypoint_dag().unwrap();
        assert_eq!(dag.tasks.len(), 2);
        assert!(dag.task("node1").unwrap().dependencies.is_empty());
        assert_eq!(dag.task("node2").unwrap().dependencies, vec!["node1".to_string()]);
        assert_eq!(workflow.spec.templates.len(), 3);
    }

    #[test]
    fn test_pipeline_spec_annotation() {
        let params = RunParameters::from_flat([("epochs", json!(10))]).unwrap();
        let workflow = render_with(
            RunConfig::new("img", "exp", "run").with_description("demo"),
            params,
        );

        let spec: serde_json::Value =
            serde_json::from_str(&workflow.metadata.annotations[PIPELINE_SPEC_ANNOTATION]).unwrap();
        assert_eq!(
            spec,
            json!({
                "name": "My Project",
                "description": "demo",
                "inputs": [{"name": "epochs", "type": "Integer", "default": "10"}],
            })
        );
        assert_eq!(
            workflow.spec.arguments.parameters,
            vec![Parameter::valued("epochs", "10")]
        );
    }

    #[test]
    fn test_parameters_flow_through_inputs() {
        let params = RunParameters::from_flat([("epochs", json!(10))]).unwrap();
        let workflow = render_with(RunConfig::new("img", "exp", "run"), params);

        let node = workflow.template("node1").unwrap();
        assert_eq!(
            node.inputs.as_ref().unwrap().parameters,
            vec![Parameter::named("epochs")]
        );
        let container = node.container.as_ref().unwrap();
        assert_eq!(
            container.args,
            vec!["_".to_string(), "epochs".to_string(), "{{inputs.parameters.epochs}}".to_string()]
        );

        let task = workflow.entrypoint_dag().unwrap().task("node1").unwrap();
        assert_eq!(
            task.arguments.parameters,
            vec![Parameter::valued("epochs", "{{workflow.parameters.epochs}}")]
        );
    }

    #[test]
    fn test_tracking_output_travels_as_parameter() {
        let workflow = render_with(
            RunConfig::new("img", "exp", "run").with_tracking(true),
            RunParameters::new(),
        );

        let bootstrap = workflow.template(TRACKING_UNIT).unwrap();
        assert_eq!(
            bootstrap.outputs.as_ref().unwrap().parameters,
            vec![Parameter::from_path(
                "tracking-start-run-tracking-run-id",
                "/tmp/tracking_run_id"
            )]
        );

        let node = workflow.template("node1").unwrap().container.as_ref().unwrap();
        let run_id = node.env.iter().find(|e| e.name == "MLFLOW_RUN_ID").unwrap();
        assert_eq!(run_id.value, "{{inputs.parameters.tracking-start-run-tracking-run-id}}");

        let task = workflow.entrypoint_dag().unwrap().task("node1").unwrap();
        assert_eq!(task.dependencies, vec![TRACKING_UNIT.to_string()]);
        assert_eq!(
            task.arguments.parameters[0].value.as_deref(),
            Some("{{tasks.tracking-start-run.outputs.parameters.tracking-start-run-tracking-run-id}}")
        );
    }

    #[test]
    fn test_volume_claim_resource_template() {
        let workflow = render_with(
            RunConfig::new("img", "exp", "run")
                .with_volume(VolumeConfig::default().with_storageclass("standard")),
            RunParameters::new(),
        );

        let claim = workflow.template(VOLUME_CLAIM_UNIT).unwrap();
        let resource = claim.resource.as_ref().unwrap();
        assert_eq!(resource.action, "create");
        let manifest: serde_yaml::Value = serde_yaml::from_str(&resource.manifest).unwrap();
        assert_eq!(manifest["kind"].as_str(), Some("PersistentVolumeClaim"));
        assert_eq!(
            manifest["metadata"]["name"].as_str(),
            Some("{{workflow.name}}-pipeline-data-volume")
        );
        assert_eq!(manifest["spec"]["resources"]["requests"]["storage"].as_str(), Some("1Gi"));
        assert_eq!(manifest["spec"]["accessModes"][0].as_str(), Some("ReadWriteOnce"));
        assert_eq!(manifest["spec"]["storageClassName"].as_str(), Some("standard"));

        assert_eq!(workflow.spec.on_exit.as_deref(), Some("on-exit"));
        let node = serde_json::to_value(workflow.template("node1").unwrap()).unwrap();
        assert_eq!(
            node["volumes"][0]["persistentVolumeClaim"]["claimName"],
            json!("{{workflow.name}}-pipeline-data-volume")
        );
        assert_eq!(node["container"]["securityContext"]["runAsUser"], json!(0));
    }

    #[test]
    fn test_resources_limits_equal_requests() {
        let run_config = RunConfig::new("img", "exp", "run")
            .with_resources(
                NodeConfig::new()
                    .with_default([("cpu", "500m"), ("memory", "1Gi")].into_iter().collect::<ResourceSpec>()),
            )
            .with_retry_policy(
                NodeConfig::new().with_default(RetryPolicyConfig::new(3).with_backoff("30s", 2.0)),
            )
            .with_max_cache_staleness("P0D");
        let workflow = render_with(run_config, RunParameters::new());

        let node = workflow.template("node2").unwrap();
        let resources = node.container.as_ref().unwrap().resources.as_ref().unwrap();
        assert_eq!(resources.limits, resources.requests);
        assert_eq!(resources.limits["cpu"], "500m");

        let retry = node.retry_strategy.as_ref().unwrap();
        assert_eq!(retry.limit, 3);
        assert_eq!(retry.retry_policy, "Always");
        assert_eq!(retry.backoff.as_ref().unwrap().duration.as_deref(), Some("30s"));
        assert_eq!(
            node.annotation("pipelines.kubeflow.org/max_cache_staleness"),
            Some("P0D")
        );
    }

    #[test]
    fn test_exit_handler_reads_workflow_parameters() {
        let params = RunParameters::from_flat([("epochs", json!(10))]).unwrap();
        let workflow = render_with(
            RunConfig::new("img", "exp", "run").with_on_exit_pipeline("notify"),
            params,
        );

        assert_eq!(workflow.spec.on_exit.as_deref(), Some("on-exit"));
        let exit = workflow.template("on-exit").unwrap().container.as_ref().unwrap();
        assert_eq!(exit.args, vec!["_", "epochs", "{{workflow.parameters.epochs}}"]);
    }

    #[test]
    fn test_names_are_lowercase() {
        let graph = TaskGraph::from_data_flow("Training", [Task::new("Fit_Model")]).unwrap();
        let compiled = PipelineCompiler::new(
            "My Project",
            "base",
            RunConfig::new("img", "exp", "run").with_volume(VolumeConfig::default()),
        )
        .compile(&graph)
        .unwrap();
        let workflow = render(&compiled).unwrap();

        assert_eq!(workflow.metadata.generate_name, "my-project-");
        assert!(workflow.template("fit-model").is_some());
        let claim = workflow.template(VOLUME_CLAIM_UNIT).unwrap().resource.as_ref().unwrap();
        assert!(claim.manifest.contains("{{workflow.name}}-training-data-volume"));
    }

    #[test]
    fn test_write_yaml_and_json() {
        let workflow = render_with(RunConfig::new("img", "exp", "run"), RunParameters::new());
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("pipeline.yaml");
        workflow.write_to(&yaml_path).unwrap();
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&yaml_path).unwrap()).unwrap();
        assert_eq!(yaml["kind"].as_str(), Some("Workflow"));
        assert_eq!(yaml["spec"]["serviceAccountName"].as_str(), Some("pipeline-runner"));

        let json_path = dir.path().join("pipeline.json");
        workflow.write_to(&json_path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(json["spec"]["entrypoint"], json!("my-project"));
        assert_eq!(json["spec"]["templates"][1]["container"]["image"], json!("img"));
    }
}
