//! Shared volume lifecycle.
//!
//! One claim per run, optionally seeded from the image's data directory and
//! deleted by the exit handler unless it is kept.

use tracing::debug;

use super::command::{RunnerCommand, WORKFLOW_NAME_PLACEHOLDER};
use super::naming::{sanitize_name, VOLUME_CLAIM_UNIT, VOLUME_INIT_UNIT};
use super::unit::{ContainerSpec, ExecutionUnit, SharedVolume, VolumeClaimSpec, VolumeMount};
use crate::config::{PersistentVolumeClaimSource, VolumeConfig, VolumeDefinition, VolumeSource};

/// Name of the shared volume inside every mounting unit.
pub const SHARED_VOLUME_NAME: &str = "data-volume";

/// How node units attach the shared volume.
#[derive(Debug, Clone, PartialEq)]
pub struct MountSpec {
    /// Volume to declare on the unit.
    pub volume: VolumeDefinition,
    /// Where to mount it.
    pub mount_path: String,
    /// Unit the node units must wait for.
    pub ready_after: String,
    /// User id for mounting units.
    pub run_as_user: Option<i64>,
}

impl MountSpec {
    /// Attaches the volume to `unit`.
    pub fn attach(&self, unit: &mut ExecutionUnit) {
        unit.dependencies.insert(self.ready_after.clone());
        unit.volumes.push(self.volume.clone());
        if let Some(container) = unit.container_spec_mut() {
            container.volume_mounts.push(VolumeMount {
                name: self.volume.name.clone(),
                mount_path: self.mount_path.clone(),
            });
            container.run_as_user = self.run_as_user;
        }
    }
}

/// Units and mount produced for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedVolume {
    /// Creates the claim.
    pub claim_unit: ExecutionUnit,
    /// Seeds the claim; absent with `skip_init`.
    pub init_unit: Option<ExecutionUnit>,
    /// How node units mount it.
    pub mount: MountSpec,
    /// Summary for the execution graph.
    pub shared: SharedVolume,
}

/// Plans the shared volume of one pipeline.
#[derive(Debug, Clone)]
pub struct VolumeManager<'a> {
    config: &'a VolumeConfig,
    pipeline: &'a str,
}

impl<'a> VolumeManager<'a> {
    /// Creates a manager.
    #[must_use]
    pub fn new(config: &'a VolumeConfig, pipeline: &'a str) -> Self {
        Self { config, pipeline }
    }

    /// Claim name, unique per workflow run.
    #[must_use]
    pub fn claim_name(&self) -> String {
        format!(
            "{WORKFLOW_NAME_PLACEHOLDER}-{}",
            sanitize_name(&format!("{}-data-volume", self.pipeline))
        )
    }

    /// Whether the exit handler deletes the claim.
    #[must_use]
    pub fn deletes_on_exit(&self) -> bool {
        !self.config.keep
    }

    /// Creates the claim unit, the optional init unit and the node mount.
    ///
    /// `data_path` is where node units expect their data, `root` the project
    /// directory of `image`.
    #[must_use]
    pub fn provision(&self, image: &str, root: &str, data_path: &str) -> ProvisionedVolume {
        let claim_name = self.claim_name();
        let claim_unit = ExecutionUnit::volume_claim(
            VOLUME_CLAIM_UNIT,
            VolumeClaimSpec {
                claim_name: claim_name.clone(),
                size: self.config.size.clone(),
                access_modes: self.config.access_modes.clone(),
                storage_class: self.config.storageclass.clone(),
            },
        );

        let volume = VolumeDefinition {
            name: SHARED_VOLUME_NAME.to_string(),
            source: VolumeSource::PersistentVolumeClaim(PersistentVolumeClaimSource {
                claim_name: claim_name.clone(),
                read_only: None,
            }),
        };

        let init_unit = if self.config.skip_init {
            None
        } else {
            let seed_path = format!("{}/datavolume", root.trim_end_matches('/'));
            let mut unit = ExecutionUnit::container(
                VOLUME_INIT_UNIT,
                ContainerSpec::new(image, RunnerCommand::seed_volume(data_path, &seed_path)),
            );
            MountSpec {
                volume: volume.clone(),
                mount_path: seed_path,
                ready_after: VOLUME_CLAIM_UNIT.to_string(),
                run_as_user: self.config.owner,
            }
            .attach(&mut unit);
            Some(unit)
        };

        let ready_after = init_unit
            .as_ref()
            .map_or(VOLUME_CLAIM_UNIT, |u| u.name.as_str())
            .to_string();

        debug!(
            claim = %claim_name,
            size = %self.config.size,
            seeded = init_unit.is_some(),
            "Shared volume planned"
        );

        ProvisionedVolume {
            claim_unit,
            init_unit,
            mount: MountSpec {
                volume,
                mount_path: data_path.to_string(),
                ready_after,
                run_as_user: self.config.owner,
            },
            shared: SharedVolume {
                claim_unit: VOLUME_CLAIM_UNIT.to_string(),
                claim_name,
                mount_path: data_path.to_string(),
            },
        }
    }
}
