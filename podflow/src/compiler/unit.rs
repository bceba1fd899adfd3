//! Execution units and the execution graph.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{
    AccessMode, ImagePullPolicy, RetryPolicyConfig, TolerationConfig, VolumeDefinition,
};
use crate::graph::PipelineParameter;

/// A container argument or environment value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Passed through unchanged.
    Literal(String),
    /// A run-level parameter, resolved at submission time.
    Parameter(String),
    /// An output parameter of another unit.
    UnitOutput {
        /// Producing unit.
        unit: String,
        /// Output name on that unit.
        output: String,
    },
}

impl Arg {
    /// Creates a literal.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }
}

/// An environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: Arg,
}

impl EnvVar {
    /// Creates a variable with a literal value.
    #[must_use]
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Arg::literal(value),
        }
    }
}

/// A volume mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Name of a volume declared on the unit.
    pub name: String,
    /// Absolute mount path.
    pub mount_path: String,
}

/// A file the backend collects after the container exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutput {
    /// Logical name.
    pub name: String,
    /// Absolute path inside the container.
    pub path: String,
}

/// A container to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Pull policy, set for every unit in a final pass.
    pub image_pull_policy: ImagePullPolicy,
    /// Entrypoint.
    pub command: Vec<String>,
    /// Arguments.
    pub args: Vec<Arg>,
    /// Environment.
    pub env: Vec<EnvVar>,
    /// Resource quantities, used as both limits and requests.
    pub resources: BTreeMap<String, String>,
    /// User id to run as.
    pub run_as_user: Option<i64>,
    /// Mounts.
    pub volume_mounts: Vec<VolumeMount>,
    /// Files registered as backend artifacts.
    pub output_artifacts: Vec<FileOutput>,
    /// Files read back as output parameters.
    pub output_parameters: Vec<FileOutput>,
}

impl ContainerSpec {
    /// Creates a container with an image and command and nothing else.
    #[must_use]
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            image_pull_policy: ImagePullPolicy::default(),
            command,
            args: Vec::new(),
            env: Vec::new(),
            resources: BTreeMap::new(),
            run_as_user: None,
            volume_mounts: Vec::new(),
            output_artifacts: Vec::new(),
            output_parameters: Vec::new(),
        }
    }

    /// Sets the arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Arg>) -> Self {
        self.args = args;
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn with_env(mut self, env: Vec<EnvVar>) -> Self {
        self.env = env;
        self
    }
}

/// A persistent volume claim created by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeClaimSpec {
    /// Claim name, may contain backend placeholders.
    pub claim_name: String,
    /// Requested size.
    pub size: String,
    /// Access modes.
    pub access_modes: Vec<AccessMode>,
    /// Storage class; cluster default when absent.
    pub storage_class: Option<String>,
}

/// What a unit does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    /// Runs a container.
    Container(Box<ContainerSpec>),
    /// Creates a volume claim.
    VolumeClaim(VolumeClaimSpec),
}

/// One runnable step of the execution graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUnit {
    /// Unique, backend-safe name.
    pub name: String,
    /// The work.
    pub kind: UnitKind,
    /// Units that must finish first.
    pub dependencies: BTreeSet<String>,
    /// Backend annotations.
    pub annotations: BTreeMap<String, String>,
    /// Retry policy enforced by the backend.
    pub retry_policy: Option<RetryPolicyConfig>,
    /// Tolerations.
    pub tolerations: Vec<TolerationConfig>,
    /// Node selector.
    pub node_selector: BTreeMap<String, String>,
    /// Volumes mountable by the container.
    pub volumes: Vec<VolumeDefinition>,
}

impl ExecutionUnit {
    /// Creates a container unit.
    #[must_use]
    pub fn container(name: impl Into<String>, spec: ContainerSpec) -> Self {
        Self::new(name, UnitKind::Container(Box::new(spec)))
    }

    /// Creates a volume claim unit.
    #[must_use]
    pub fn volume_claim(name: impl Into<String>, spec: VolumeClaimSpec) -> Self {
        Self::new(name, UnitKind::VolumeClaim(spec))
    }

    fn new(name: impl Into<String>, kind: UnitKind) -> Self {
        Self {
            name: name.into(),
            kind,
            dependencies: BTreeSet::new(),
            annotations: BTreeMap::new(),
            retry_policy: None,
            tolerations: Vec::new(),
            node_selector: BTreeMap::new(),
            volumes: Vec::new(),
        }
    }

    /// Adds an ordering edge.
    #[must_use]
    pub fn after(mut self, unit: impl Into<String>) -> Self {
        self.dependencies.insert(unit.into());
        self
    }

    /// Returns the container, if this unit runs one.
    #[must_use]
    pub fn container_spec(&self) -> Option<&ContainerSpec> {
        match &self.kind {
            UnitKind::Container(spec) => Some(spec),
            UnitKind::VolumeClaim(_) => None,
        }
    }

    /// Returns the container mutably.
    pub fn container_spec_mut(&mut self) -> Option<&mut ContainerSpec> {
        match &mut self.kind {
            UnitKind::Container(spec) => Some(spec),
            UnitKind::VolumeClaim(_) => None,
        }
    }

    /// Returns true if the unit mounts `volume`.
    #[must_use]
    pub fn mounts(&self, volume: &str) -> bool {
        self.container_spec()
            .is_some_and(|c| c.volume_mounts.iter().any(|m| m.name == volume))
    }
}

/// Pipeline-level settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineMetadata {
    /// Pipeline (project) name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Seconds a finished run is kept.
    pub ttl_seconds: u64,
    /// Cache staleness hint.
    pub max_cache_staleness: Option<String>,
}

/// The shared volume of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedVolume {
    /// Unit that creates the claim.
    pub claim_unit: String,
    /// Claim name.
    pub claim_name: String,
    /// Where node units see it.
    pub mount_path: String,
}

/// The compiled artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionGraph {
    /// Pipeline metadata.
    pub metadata: PipelineMetadata,
    /// Run-level parameters.
    pub parameters: Vec<PipelineParameter>,
    /// Units in a valid execution order.
    pub units: Vec<ExecutionUnit>,
    /// Runs after the graph whatever its outcome.
    pub exit_handler: Option<ExecutionUnit>,
    /// Shared volume, if requested.
    pub shared_volume: Option<SharedVolume>,
}

impl ExecutionGraph {
    /// Looks up a unit, including the exit handler.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&ExecutionUnit> {
        self.units
            .iter()
            .chain(self.exit_handler.iter())
            .find(|u| u.name == name)
    }

    /// Names of the DAG units in order.
    pub fn unit_names(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.name.as_str())
    }

    /// Every unit, the exit handler last.
    pub fn all_units(&self) -> impl Iterator<Item = &ExecutionUnit> {
        self.units.iter().chain(self.exit_handler.iter())
    }

    /// Every unit, mutably.
    pub fn all_units_mut(&mut self) -> impl Iterator<Item = &mut ExecutionUnit> {
        self.units.iter_mut().chain(self.exit_handler.iter_mut())
    }
}
