//! Command definitions for the podflow CLI.
//!
//! Every command loads the plugin configuration and, where needed, the task
//! graph, then hands over to the library. No policy lives here.

use anyhow::Context;
use clap::Parser;
use podflow::client::{
    Credentials, ExperimentSpec, KubeflowBackend, KubernetesVolumeReclaimer, PipelineClient,
    RunOptions, ScheduleOptions,
};
use podflow::compiler::{ExecutionGraph, PipelineCompiler};
use podflow::config::PluginConfig;
use podflow::graph::{Catalog, RunParameters, TaskGraph};
use podflow::workflow::render;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default location of the plugin configuration.
const DEFAULT_CONFIG: &str = "conf/base/kubeflow.yaml";

/// Default location of the exported task graph.
const DEFAULT_GRAPH: &str = "pipeline.json";

/// Compile task graphs into Kubeflow Pipelines workflows and run them.
#[derive(Parser)]
#[command(name = "podflow")]
#[command(about = "Compile task graphs into Kubeflow Pipelines workflows and manage their lifecycle")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Plugin configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG, global = true)]
    pub config: PathBuf,

    /// Configuration environment passed to the runner.
    #[arg(short, long, default_value = "base", global = true)]
    pub env: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// List pipelines on the backend.
    ListPipelines,

    /// Compile and submit a one-off run.
    RunOnce(RunOnceArgs),

    /// Compile to a workflow file.
    Compile(CompileArgs),

    /// Compile and upload as a pipeline or a new version of it.
    UploadPipeline(UploadArgs),

    /// Compile, upload if needed and install a recurring run.
    Schedule(ScheduleArgs),

    /// Delete the shared data volume of a finished workflow.
    DeletePipelineVolume {
        /// Name of the persistent volume claim.
        name: String,
    },
}

/// Inputs of the compiler.
#[derive(Parser, Debug)]
pub struct GraphArgs {
    /// Project name; used for the workflow entrypoint.
    #[arg(long, default_value = "project")]
    pub project: String,

    /// Exported task graph (JSON).
    #[arg(short, long, default_value = DEFAULT_GRAPH)]
    pub graph: PathBuf,

    /// Artifact catalog (YAML).
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Run-level parameters (YAML).
    #[arg(long)]
    pub params: Option<PathBuf>,
}

/// Arguments for `podflow run-once`.
#[derive(Parser, Debug)]
pub struct RunOnceArgs {
    #[command(flatten)]
    pub graph: GraphArgs,

    /// Experiment; `run_config.experiment_name` when absent.
    #[arg(long)]
    pub experiment: Option<String>,

    /// Run name; `run_config.run_name` when absent.
    #[arg(long)]
    pub run_name: Option<String>,

    /// Parameter override as `name=value`; repeatable.
    #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
    pub parameters: Vec<(String, String)>,

    /// Wait for the run to finish.
    #[arg(long)]
    pub wait: bool,

    /// Seconds to wait; `run_config.wait_timeout` when absent.
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Arguments for `podflow compile`.
#[derive(Parser, Debug)]
pub struct CompileArgs {
    #[command(flatten)]
    pub graph: GraphArgs,

    /// Output file; `.json` selects JSON, anything else YAML.
    #[arg(short, long, default_value = "pipeline.yml")]
    pub output: PathBuf,
}

/// Arguments for `podflow upload-pipeline`.
#[derive(Parser, Debug)]
pub struct UploadArgs {
    #[command(flatten)]
    pub graph: GraphArgs,

    /// Pipeline name on the backend; the graph name when absent.
    #[arg(long)]
    pub pipeline_name: Option<String>,
}

/// Arguments for `podflow schedule`.
#[derive(Parser, Debug)]
pub struct ScheduleArgs {
    #[command(flatten)]
    pub graph: GraphArgs,

    /// Pipeline name on the backend; the graph name when absent.
    #[arg(long)]
    pub pipeline_name: Option<String>,

    /// Cron expression.
    #[arg(long, default_value = "0 0 4 * * *")]
    pub cron: String,

    /// Experiment; `run_config.experiment_name` when absent.
    #[arg(long)]
    pub experiment: Option<String>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the parsed command and returns the process exit code.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<i32> {
    if let Commands::DeletePipelineVolume { name } = &cli.command {
        return delete_pipeline_volume(name).await;
    }

    let config = PluginConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::ListPipelines => {
            let client = client(&config)?;
            println!("{}", client.list_pipelines().await?);
        }
        Commands::Compile(args) => {
            let compiled = compile(&config, &cli.env, &args.graph)?;
            render(&compiled)?.write_to(&args.output)?;
            println!("Generated pipeline definition was saved to {}", args.output.display());
        }
        Commands::UploadPipeline(args) => {
            let (compiled, graph_name) = compile_named(&config, &cli.env, &args.graph)?;
            let name = args.pipeline_name.unwrap_or(graph_name);
            let outcome = client(&config)?.upload(&compiled, &name).await?;
            println!("{}", outcome.link);
        }
        Commands::Schedule(args) => {
            let (compiled, graph_name) = compile_named(&config, &cli.env, &args.graph)?;
            let name = args.pipeline_name.unwrap_or(graph_name);
            let experiment = experiment(&config, args.experiment);
            let options = ScheduleOptions::new(experiment, args.cron)
                .with_run_name(config.run_config.scheduled_run_name.clone());
            let outcome = client(&config)?.schedule(&compiled, &name, &options).await?;
            info!(
                recurring_run_id = %outcome.recurring_run_id,
                replaced = outcome.deleted.len(),
                "Schedule installed"
            );
        }
        Commands::RunOnce(args) => {
            let compiled = compile(&config, &cli.env, &args.graph)?;
            let experiment = experiment(&config, args.experiment);
            let run_name = args
                .run_name
                .unwrap_or_else(|| config.run_config.run_name.clone());
            let mut options = RunOptions::new(experiment, run_name)
                .with_parameters(args.parameters.into_iter().collect());
            if args.wait || config.run_config.wait_for_completion {
                let timeout = args.timeout.unwrap_or(config.run_config.wait_timeout);
                options = options.with_wait(Duration::from_secs(timeout));
            }
            let outcome = client(&config)?.run_once(&compiled, &options).await?;
            if let Some(error) = &outcome.error {
                tracing::error!(run_id = %outcome.run_id, %error, "Run did not succeed");
            }
            return Ok(outcome.exit_code());
        }
        Commands::DeletePipelineVolume { .. } => {}
    }
    Ok(0)
}

async fn delete_pipeline_volume(name: &str) -> anyhow::Result<i32> {
    let reclaimer = KubernetesVolumeReclaimer::in_cluster()
        .context("the volume can only be deleted from inside the cluster")?;
    reclaimer.delete_claim(name).await?;
    Ok(0)
}

fn client(config: &PluginConfig) -> anyhow::Result<PipelineClient<KubeflowBackend>> {
    let backend = KubeflowBackend::new(&config.host, Credentials::from_env())?;
    Ok(PipelineClient::new(backend, &config.host))
}

fn experiment(config: &PluginConfig, name: Option<String>) -> ExperimentSpec {
    ExperimentSpec::new(name.unwrap_or_else(|| config.run_config.experiment_name.clone()))
        .with_namespace(config.run_config.experiment_namespace.clone())
}

fn compile(config: &PluginConfig, env: &str, args: &GraphArgs) -> anyhow::Result<ExecutionGraph> {
    Ok(compile_named(config, env, args)?.0)
}

fn compile_named(
    config: &PluginConfig,
    env: &str,
    args: &GraphArgs,
) -> anyhow::Result<(ExecutionGraph, String)> {
    let graph = TaskGraph::from_json_str(&read(&args.graph)?)?;
    let mut compiler = PipelineCompiler::new(&args.project, env, config.run_config.clone())
        .with_forwarded_env(forwarded_env(&config.run_config.forward_env_prefix));
    if let Some(path) = &args.catalog {
        compiler = compiler.with_catalog(Catalog::from_yaml_str(&read(path)?)?);
    }
    if let Some(path) = &args.params {
        compiler = compiler.with_parameters(RunParameters::from_yaml_str(&read(path)?)?);
    }
    let compiled = compiler.compile(&graph)?;
    Ok((compiled, graph.name().to_string()))
}

fn read(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Process variables whose name starts with `prefix`.
fn forwarded_env(prefix: &str) -> BTreeMap<String, String> {
    if prefix.is_empty() {
        return BTreeMap::new();
    }
    std::env::vars()
        .filter(|(key, _)| key.starts_with(prefix))
        .collect()
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}
