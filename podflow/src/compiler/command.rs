//! Commands run inside the project image.

use super::unit::Arg;
use crate::graph::RunParameters;

/// Placeholder the backend replaces with the run's unique id.
pub const RUN_ID_PLACEHOLDER: &str = "{{workflow.uid}}";

/// Placeholder the backend replaces with the workflow name.
pub const WORKFLOW_NAME_PLACEHOLDER: &str = "{{workflow.name}}";

/// First positional argument of every node unit. `sh -c` binds it to `$0`,
/// so parameter pairs start at `$1`.
pub const SHIM_PLACEHOLDER: &str = "_";

/// File the tracking bootstrap writes its run id to.
pub const TRACKING_RUN_ID_PATH: &str = "/tmp/tracking_run_id";

/// Writes the `name value` argument pairs into `config.yaml` under `run.params`.
/// Values outside `[A-Za-z0-9._+-]` are written as single-quoted YAML scalars
/// with `'` doubled; plain values keep their YAML type.
const PARAMS_DUMPER: &str = r#"printf 'run:\n  params:\n' > config.yaml && while [ "$#" -gt 1 ]; do case "$2" in ''|-|*[!A-Za-z0-9._+-]*) v="'$(printf '%s' "$2" | sed "s/'/''/g")'";; *) v="$2";; esac; printf '    %s: %s\n' "$1" "$v" >> config.yaml; shift 2; done"#;

/// Builds command lines for the project runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCommand {
    runner: String,
    env: String,
    pipeline: String,
}

impl RunnerCommand {
    /// Creates a command builder for the default `kedro` runner.
    #[must_use]
    pub fn new(env: impl Into<String>, pipeline: impl Into<String>) -> Self {
        Self {
            runner: "kedro".to_string(),
            env: env.into(),
            pipeline: pipeline.into(),
        }
    }

    /// Overrides the runner executable.
    #[must_use]
    pub fn with_runner(mut self, runner: impl Into<String>) -> Self {
        self.runner = runner.into();
        self
    }

    /// Command and arguments that run `tasks` with the run parameters.
    /// Each task gets its own `--node` flag since names may contain commas.
    pub fn run_tasks(&self, tasks: &[String], parameters: &RunParameters) -> (Vec<String>, Vec<Arg>) {
        let mut run = format!(
            "{} run --env {} --pipeline {}",
            self.runner,
            shell_quote(&self.env),
            shell_quote(&self.pipeline),
        );
        for task in tasks {
            run.push_str(" --node ");
            run.push_str(&shell_quote(task));
        }

        let script = if parameters.is_empty() {
            run
        } else {
            run.push_str(" --config config.yaml");
            format!("{PARAMS_DUMPER} && {run}")
        };

        (vec!["sh".to_string(), "-c".to_string(), script], parameter_args(parameters))
    }

    /// Command that opens a tracking run tied to the workflow.
    #[must_use]
    pub fn tracking_start(&self) -> Vec<String> {
        vec![
            self.runner.clone(),
            "kubeflow".to_string(),
            "--env".to_string(),
            self.env.clone(),
            "mlflow-start".to_string(),
            RUN_ID_PLACEHOLDER.to_string(),
        ]
    }

    /// Shell command deleting a shared volume claim.
    #[must_use]
    pub fn delete_volume(&self, claim_name: &str) -> String {
        format!("{} kubeflow delete-pipeline-volume {claim_name}", self.runner)
    }

    /// Shell command running another pipeline of the project. The run
    /// parameters are written to `config.yaml` first.
    #[must_use]
    pub fn run_pipeline(&self, pipeline: &str) -> String {
        format!(
            "{PARAMS_DUMPER} && {} run --config config.yaml --env {} --pipeline {}",
            self.runner,
            shell_quote(&self.env),
            shell_quote(pipeline),
        )
    }

    /// Exit handler command and arguments, or `None` when there is nothing
    /// to do.
    #[must_use]
    pub fn exit_handler(
        &self,
        delete_claim: Option<&str>,
        on_exit_pipeline: Option<&str>,
        parameters: &RunParameters,
    ) -> Option<(Vec<String>, Vec<Arg>)> {
        let parts: Vec<String> = delete_claim
            .map(|claim| self.delete_volume(claim))
            .into_iter()
            .chain(on_exit_pipeline.map(|p| self.run_pipeline(p)))
            .collect();
        if parts.is_empty() {
            return None;
        }
        let args = if on_exit_pipeline.is_some() {
            parameter_args(parameters)
        } else {
            Vec::new()
        };
        Some((vec!["sh".to_string(), "-c".to_string(), parts.join(";")], args))
    }

    /// Copies the image's data directory onto the shared volume.
    #[must_use]
    pub fn seed_volume(data_path: &str, volume_path: &str) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cp --verbose -r {data_path}/* {volume_path}"),
        ]
    }
}

/// `_` followed by `name, {{name}}` pairs.
fn parameter_args(parameters: &RunParameters) -> Vec<Arg> {
    let mut args = vec![Arg::literal(SHIM_PLACEHOLDER)];
    for name in parameters.names() {
        args.push(Arg::literal(name));
        args.push(Arg::Parameter(name.to_string()));
    }
    args
}

/// Quotes a word for `sh` unless it is already safe.
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-.,/:=@+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_run_tasks_without_parameters() {
        let cmd = RunnerCommand::new("pipelines", "__default__");
        let (command, args) = cmd.run_tasks(&["node1".to_string()], &RunParameters::new());

        assert_eq!(
            command,
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "kedro run --env pipelines --pipeline __default__ --node node1".to_string(),
            ]
        );
        assert_eq!(args, vec![Arg::literal("_")]);
    }

    #[test]
    fn test_run_tasks_with_parameters() {
        let params = RunParameters::from_flat([("param1", json!(1)), ("param2", json!("x"))]).unwrap();
        let cmd = RunnerCommand::new("test-env", "pipeline");
        let (command, args) = cmd.run_tasks(&["a".to_string(), "b".to_string()], &params);

        assert!(command[2].starts_with("printf 'run:\\n  params:\\n' > config.yaml"));
        assert!(command[2].ends_with(
            "kedro run --env test-env --pipeline pipeline --node a --node b --config config.yaml"
        ));
        assert_eq!(
            args,
            vec![
                Arg::literal("_"),
                Arg::literal("param1"),
                Arg::Parameter("param1".to_string()),
                Arg::literal("param2"),
                Arg::Parameter("param2".to_string()),
            ]
        );
    }

    #[test]
    fn test_task_names_are_quoted() {
        let cmd = RunnerCommand::new("base", "p");
        let (command, _) = cmd.run_tasks(&["split([a]) -> [b]".to_string()], &RunParameters::new());

        assert!(command[2].ends_with("--node 'split([a]) -> [b]'"));

        let (command, _) = cmd.run_tasks(&["a,b".to_string()], &RunParameters::new());
        assert!(command[2].ends_with("--node a,b"));
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_tracking_start() {
        let cmd = RunnerCommand::new("test-env", "p");
        assert_eq!(
            cmd.tracking_start().join(" "),
            "kedro kubeflow --env test-env mlflow-start {{workflow.uid}}"
        );
    }

    #[test]
    fn test_exit_handler_composition() {
        let cmd = RunnerCommand::new("unittests", "p");
        let none = RunParameters::new();

        assert_eq!(cmd.exit_handler(None, None, &none), None);

        let (command, args) = cmd
            .exit_handler(Some("{{workflow.name}}-pipeline-data-volume"), None, &none)
            .unwrap();
        assert_eq!(
            command[2],
            "kedro kubeflow delete-pipeline-volume {{workflow.name}}-pipeline-data-volume"
        );
        assert!(args.is_empty());

        let (command, _) = cmd
            .exit_handler(Some("{{workflow.name}}-pipeline-data-volume"), Some("notify_via_slack"), &none)
            .unwrap();
        assert!(command[2].starts_with(
            "kedro kubeflow delete-pipeline-volume {{workflow.name}}-pipeline-data-volume;printf 'run:"
        ));
        assert!(command[2]
            .ends_with("&& kedro run --config config.yaml --env unittests --pipeline notify_via_slack"));
    }

    #[test]
    fn test_exit_pipeline_writes_config_before_running() {
        let params = RunParameters::from_flat([("epochs", json!(10))]).unwrap();
        let cmd = RunnerCommand::new("base", "p");
        let (command, args) = cmd.exit_handler(None, Some("notify"), &params).unwrap();

        let dump = command[2].find("> config.yaml").unwrap();
        let run = command[2].find("kedro run --config config.yaml").unwrap();
        assert!(dump < run);
        assert_eq!(
            args,
            vec![
                Arg::literal("_"),
                Arg::literal("epochs"),
                Arg::Parameter("epochs".to_string()),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_params_dumper_quotes_values() {
        let dir = tempfile::tempdir().unwrap();
        let status = std::process::Command::new("sh")
            .current_dir(dir.path())
            .args(["-c", PARAMS_DUMPER, "_"])
            .args(["greeting", "note: hi", "tag", "#prod", "single", "'x", "double", "\"y"])
            .args(["epochs", "10", "empty", ""])
            .status()
            .unwrap();
        assert!(status.success());

        let written = std::fs::read_to_string(dir.path().join("config.yaml")).unwrap();
        let config: serde_yaml::Value = serde_yaml::from_str(&written).unwrap();
        let params = &config["run"]["params"];
        assert_eq!(params["greeting"].as_str(), Some("note: hi"));
        assert_eq!(params["tag"].as_str(), Some("#prod"));
        assert_eq!(params["single"].as_str(), Some("'x"));
        assert_eq!(params["double"].as_str(), Some("\"y"));
        assert_eq!(params["epochs"].as_u64(), Some(10));
        assert_eq!(params["empty"].as_str(), Some(""));
    }

    #[test]
    fn test_seed_volume() {
        assert_eq!(
            RunnerCommand::seed_volume("/home/kedro/data", "/home/kedro/datavolume")[2],
            "cp --verbose -r /home/kedro/data/* /home/kedro/datavolume"
        );
    }
}
