//! Pipeline compiler.

use std::collections::BTreeMap;
use tracing::{debug, info};

use super::command::{RunnerCommand, RUN_ID_PLACEHOLDER, TRACKING_RUN_ID_PATH};
use super::naming::{sanitize_name, UnitNamer, EXIT_HANDLER_UNIT, TRACKING_UNIT};
use super::strategy::{strategy_for, GroupingStrategy, UnitGroup};
use super::unit::{
    Arg, ContainerSpec, EnvVar, ExecutionGraph, ExecutionUnit, FileOutput, PipelineMetadata,
    VolumeMount,
};
use super::volume::{MountSpec, VolumeManager};
use crate::config::{ImagePullPolicy, RunConfig};
use crate::errors::PodflowError;
use crate::graph::{Catalog, RunParameters, TaskGraph};

/// Annotation carrying the cache staleness hint.
pub const MAX_CACHE_STALENESS_ANNOTATION: &str = "pipelines.kubeflow.org/max_cache_staleness";

/// Variable carrying the backend run id into node units.
pub const RUN_ID_ENV: &str = "KUBEFLOW_RUN_ID";

/// Output name of the tracking bootstrap unit.
pub const TRACKING_RUN_ID_OUTPUT: &str = "tracking_run_id";

/// Compiles task graphs into execution graphs.
///
/// Compilation is pure: the same inputs always give the same graph, and
/// nothing is cached between calls.
#[derive(Debug)]
pub struct PipelineCompiler {
    project_name: String,
    env: String,
    run_config: RunConfig,
    catalog: Catalog,
    parameters: RunParameters,
    forwarded_env: BTreeMap<String, String>,
    strategy: Box<dyn GroupingStrategy>,
}

impl PipelineCompiler {
    /// Creates a compiler for a project and runner environment. The grouping
    /// strategy follows `run_config.node_merge_strategy`.
    #[must_use]
    pub fn new(project_name: impl Into<String>, env: impl Into<String>, run_config: RunConfig) -> Self {
        let strategy = strategy_for(run_config.node_merge_strategy);
        Self {
            project_name: project_name.into(),
            env: env.into(),
            run_config,
            catalog: Catalog::new(),
            parameters: RunParameters::new(),
            forwarded_env: BTreeMap::new(),
            strategy,
        }
    }

    /// Sets the artifact catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets the run-level parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: RunParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets variables passed into every node unit.
    #[must_use]
    pub fn with_forwarded_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.forwarded_env = env;
        self
    }

    /// Replaces the grouping strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Box<dyn GroupingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Returns the run configuration.
    #[must_use]
    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    /// Compiles with the image and pull policy from the run configuration.
    pub fn compile(&self, graph: &TaskGraph) -> Result<ExecutionGraph, PodflowError> {
        self.generate(graph, &self.run_config.image, self.run_config.image_pull_policy)
    }

    /// Compiles `graph` into an execution graph running `image`.
    pub fn generate(
        &self,
        graph: &TaskGraph,
        image: &str,
        image_pull_policy: ImagePullPolicy,
    ) -> Result<ExecutionGraph, PodflowError> {
        let entrypoint = sanitize_name(&self.project_name);
        let mut namer = UnitNamer::new().with_reserved(entrypoint, "the pipeline template");
        let groups = self.strategy.group(graph, &self.run_config, &mut namer)?;

        let commands = RunnerCommand::new(&self.env, graph.name());
        let mut units = Vec::with_capacity(groups.len() + 3);

        let tracking = self.run_config.tracking.enabled.then(|| self.tracking_unit(&commands, image));

        let volume_manager = self
            .run_config
            .volume
            .as_ref()
            .map(|config| VolumeManager::new(config, graph.name()));
        let provisioned = volume_manager.as_ref().map(|manager| {
            manager.provision(image, &self.run_config.root, &self.run_config.data_path())
        });

        let mut mount: Option<MountSpec> = None;
        let mut shared_volume = None;
        if let Some(volume) = provisioned {
            units.push(volume.claim_unit);
            units.extend(volume.init_unit);
            mount = Some(volume.mount);
            shared_volume = Some(volume.shared);
        }

        for group in &groups {
            units.push(self.group_unit(group, &commands, image, mount.as_ref())?);
        }

        if let Some(bootstrap) = tracking {
            for unit in &mut units {
                unit.dependencies.insert(bootstrap.name.clone());
            }
            units.insert(0, bootstrap);
        }

        let delete_claim = match (&volume_manager, &shared_volume) {
            (Some(manager), Some(shared)) if manager.deletes_on_exit() => Some(shared.claim_name.as_str()),
            _ => None,
        };
        let exit_handler = commands
            .exit_handler(delete_claim, self.run_config.on_exit_pipeline.as_deref(), &self.parameters)
            .map(|(command, args)| {
                ExecutionUnit::container(
                    EXIT_HANDLER_UNIT,
                    ContainerSpec::new(image, command)
                        .with_args(args)
                        .with_env(self.base_env()),
                )
            });

        let mut execution = ExecutionGraph {
            metadata: PipelineMetadata {
                name: self.project_name.clone(),
                description: self.run_config.description.clone(),
                ttl_seconds: self.run_config.ttl,
                max_cache_staleness: self.run_config.max_cache_staleness.clone(),
            },
            parameters: self.parameters.to_pipeline_parameters(),
            units,
            exit_handler,
            shared_volume,
        };

        if let Some(staleness) = self.run_config.max_cache_staleness.as_deref().filter(|s| !s.is_empty()) {
            for unit in execution.all_units_mut() {
                unit.annotations
                    .insert(MAX_CACHE_STALENESS_ANNOTATION.to_string(), staleness.to_string());
            }
        }

        for unit in execution.all_units_mut() {
            if let Some(container) = unit.container_spec_mut() {
                container.image_pull_policy = image_pull_policy;
            }
        }

        info!(
            pipeline = %graph.name(),
            strategy = self.strategy.name(),
            units = execution.units.len(),
            exit_handler = execution.exit_handler.is_some(),
            "Pipeline compiled"
        );
        Ok(execution)
    }

    fn base_env(&self) -> Vec<EnvVar> {
        self.forwarded_env
            .iter()
            .map(|(name, value)| EnvVar::literal(name, value))
            .collect()
    }

    fn node_env(&self) -> Vec<EnvVar> {
        let mut env = self.base_env();
        env.push(EnvVar::literal(RUN_ID_ENV, RUN_ID_PLACEHOLDER));
        if self.run_config.tracking.enabled {
            env.push(EnvVar {
                name: self.run_config.tracking.run_id_env.clone(),
                value: Arg::UnitOutput {
                    unit: TRACKING_UNIT.to_string(),
                    output: TRACKING_RUN_ID_OUTPUT.to_string(),
                },
            });
        }
        env
    }

    fn tracking_unit(&self, commands: &RunnerCommand, image: &str) -> ExecutionUnit {
        let mut container = ContainerSpec::new(image, commands.tracking_start()).with_env({
            let mut env = self.base_env();
            env.push(EnvVar::literal(RUN_ID_ENV, RUN_ID_PLACEHOLDER));
            env
        });
        container.output_parameters.push(FileOutput {
            name: TRACKING_RUN_ID_OUTPUT.to_string(),
            path: TRACKING_RUN_ID_PATH.to_string(),
        });
        ExecutionUnit::container(TRACKING_UNIT, container)
    }

    fn group_unit(
        &self,
        group: &UnitGroup,
        commands: &RunnerCommand,
        image: &str,
        mount: Option<&MountSpec>,
    ) -> Result<ExecutionUnit, PodflowError> {
        let (command, args) = commands.run_tasks(&group.tasks, &self.parameters);
        let mut container = ContainerSpec::new(image, command)
            .with_args(args)
            .with_env(self.node_env());

        let config = &group.config;
        if !config.resources.is_empty() {
            container.resources = config.resources.quantities();
            debug!(unit = %group.name, resources = ?container.resources, "Resources attached");
        }

        if self.run_config.store_kedro_outputs_as_kfp_artifacts {
            // artifact names are sanitized per unit and must stay distinct
            let mut artifact_names = UnitNamer::default();
            for output in &group.outputs {
                if let Some(path) = self.catalog.local_path(output) {
                    artifact_names.claim(output)?;
                    container.output_artifacts.push(FileOutput {
                        name: output.clone(),
                        path: self.container_path(path),
                    });
                }
            }
        }

        for extra in &config.extra_volumes {
            container.volume_mounts.push(VolumeMount {
                name: extra.volume.name.clone(),
                mount_path: extra.mount_path.clone(),
            });
        }

        let mut unit = ExecutionUnit::container(group.name.clone(), container);
        unit.dependencies.extend(group.dependencies.iter().cloned());
        unit.volumes
            .extend(config.extra_volumes.iter().map(|extra| extra.volume.clone()));
        unit.retry_policy.clone_from(&config.retry_policy);
        unit.tolerations = config.tolerations.clone().unwrap_or_default();
        if let Some(accelerator) = config.resources.accelerator() {
            unit.node_selector.insert(
                crate::config::ACCELERATOR_KEY.to_string(),
                accelerator.to_string(),
            );
        }
        if let Some(mount) = mount {
            mount.attach(&mut unit);
        }
        Ok(unit)
    }

    fn container_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{path}", self.run_config.root.trim_end_matches('/'))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{naming, MergedStrategy};
    use crate::graph::Task;
    use pretty_assertions::assert_eq;

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

    fn compiler(run_config: RunConfig) -> PipelineCompiler {
        PipelineCompiler::new("my-project", "test-env", run_config)
    }

    #[test]
    fn test_two_nodes_no_volume() {
        let graph = compiler(RunConfig::new("img", "exp", "run"))
            .generate(&two_nodes(), "img:tag", ImagePullPolicy::IfNotPresent)
            .unwrap();

        assert_eq!(graph.unit_names().collect::<Vec<_>>(), vec!["node1", "node2"]);
        assert!(graph.unit("node1").unwrap().dependencies.is_empty());
        assert!(graph.unit("node2").unwrap().dependencies.contains("node1"));
        for unit in &graph.units {
            assert_eq!(unit.container_spec().unwrap().image, "img:tag");
        }
        assert!(graph.exit_handler.is_none());
        assert!(graph.shared_volume.is_none());
    }

    #[test]
    fn test_node_env() {
        let mut forwarded = BTreeMap::new();
        forwarded.insert("KEDRO_CONFIG_MY_KEY".to_string(), "my-value".to_string());
        let graph = compiler(RunConfig::new("img", "exp", "run"))
            .with_forwarded_env(forwarded)
            .compile(&two_nodes())
            .unwrap();

        let env = &graph.unit("node1").unwrap().container_spec().unwrap().env;
        assert_eq!(
            env,
            &vec![
                EnvVar::literal("KEDRO_CONFIG_MY_KEY", "my-value"),
                EnvVar::literal("KUBEFLOW_RUN_ID", "{{workflow.uid}}"),
            ]
        );
    }

    #[test]
    fn test_pull_policy_applied_to_every_unit() {
        let run_config = RunConfig::new("img", "exp", "run")
            .with_volume(crate::config::VolumeConfig::default())
            .with_tracking(true)
            .with_on_exit_pipeline("notify");
        let graph = compiler(run_config)
            .generate(&two_nodes(), "img", ImagePullPolicy::Always)
            .unwrap();

        let containers: Vec<_> = graph.all_units().filter_map(ExecutionUnit::container_spec).collect();
        assert_eq!(containers.len(), 5);
        assert!(containers
            .iter()
            .all(|c| c.image_pull_policy == ImagePullPolicy::Always));
    }

    #[test]
    fn test_merged_strategy_override() {
        let graph = compiler(RunConfig::new("img", "exp", "run"))
            .with_strategy(Box::new(MergedStrategy))
            .compile(&two_nodes())
            .unwrap();

        assert_eq!(graph.unit_names().collect::<Vec<_>>(), vec!["pipeline"]);
        let command = &graph.units[0].container_spec().unwrap().command;
        assert!(command[2].ends_with("--node node1 --node node2"));
    }

    #[test]
    fn test_colliding_artifact_names_rejected() {
        let graph = TaskGraph::builder("p")
            .task(Task::new("split").with_outputs(["a_b", "a-b"]), &[])
            .unwrap()
            .build()
            .unwrap();
        let catalog = Catalog::new()
            .with_entry("a_b", crate::graph::CatalogEntry::at("data/a_b.csv"))
            .with_entry("a-b", crate::graph::CatalogEntry::at("data/a-b.csv"));

        let err = compiler(RunConfig::new("img", "exp", "run"))
            .with_catalog(catalog)
            .compile(&graph)
            .unwrap_err();
        let PodflowError::Validation(err) = err else {
            panic!("expected a validation error");
        };
        assert_eq!(err.code(), Some(crate::errors::codes::NAME_COLLISION));
    }

    #[test]
    fn test_exit_hook_receives_parameters() {
        let params = RunParameters::from_flat([("epochs", serde_json::json!(10))]).unwrap();
        let graph = compiler(RunConfig::new("img", "exp", "run").with_on_exit_pipeline("notify"))
            .with_parameters(params)
            .compile(&two_nodes())
            .unwrap();

        let exit = graph.exit_handler.as_ref().unwrap().container_spec().unwrap();
        assert!(exit.command[2].contains("> config.yaml"));
        assert_eq!(
            exit.args,
            vec![
                Arg::literal("_"),
                Arg::literal("epochs"),
                Arg::Parameter("epochs".to_string()),
            ]
        );
    }

    #[test]
    fn test_task_named_like_project_rejected() {
        let graph = TaskGraph::builder("p")
            .task(Task::new("my_project"), &[])
            .unwrap()
            .build()
            .unwrap();

        let err = compiler(RunConfig::new("img", "exp", "run")).compile(&graph).unwrap_err();
        assert!(matches!(err, PodflowError::Validation(_)));
    }

    #[test]
    fn test_task_named_like_reserved_unit_rejected() {
        let graph = TaskGraph::builder("p")
            .task(Task::new("on_exit"), &[])
            .unwrap()
            .build()
            .unwrap();

        let err = compiler(RunConfig::new("img", "exp", "run")).compile(&graph).unwrap_err();
        let PodflowError::Validation(err) = err else {
            panic!("expected a validation error");
        };
        assert_eq!(err.error_info.unwrap().context["unit"], naming::EXIT_HANDLER_UNIT);
    }
}
