//! File-management sidecar setup: database init plus one admin account

use crate::config::SidecarConfig;
use crate::error::DeployError;
use crate::runtime::{Bind, ContainerRuntime, OneShotJob};
use crate::workspace::{Workspace, SIDECAR_DATABASE};
use serde::Serialize;
use tracing::info;

/// Where `filebrowser_data/` is mounted in the one-shot containers
const MOUNT_POINT: &str = "/srv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SidecarOutcome {
    /// Database created and admin account added
    Initialized,
    /// Database already present and reuse is enabled; nothing ran
    Reused,
}

pub struct SidecarProvisioner<'a> {
    runtime: &'a dyn ContainerRuntime,
    config: &'a SidecarConfig,
}

impl<'a> SidecarProvisioner<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, config: &'a SidecarConfig) -> Self {
        Self { runtime, config }
    }

    /// Initialize the sidecar database in `filebrowser_data/` and create the
    /// admin account. Either step failing aborts the deploy.
    ///
    /// Without `reuse_existing_database`, running this against a workspace
    /// that was already provisioned fails in the init step.
    pub async fn provision(
        &self,
        workspace: &Workspace,
        admin_password: &str,
    ) -> Result<SidecarOutcome, DeployError> {
        if self.config.reuse_existing_database && workspace.sidecar_database().is_file() {
            info!(
                database = %workspace.sidecar_database().display(),
                "Sidecar database exists, reusing it"
            );
            return Ok(SidecarOutcome::Reused);
        }

        let (init, admin) = self.jobs(workspace, admin_password);

        self.runtime
            .run_once(&init)
            .await
            .map_err(|e| DeployError::Provisioning {
                step: "database init",
                reason: format!("{:#}", e),
            })?;

        self.runtime
            .run_once(&admin)
            .await
            .map_err(|e| DeployError::Provisioning {
                step: "admin account",
                reason: format!("{:#}", e),
            })?;

        info!(user = %self.config.admin_user, "Sidecar provisioned");
        Ok(SidecarOutcome::Initialized)
    }

    fn jobs(&self, workspace: &Workspace, admin_password: &str) -> (OneShotJob, OneShotJob) {
        let database = format!("{}/{}", MOUNT_POINT, SIDECAR_DATABASE);
        let bind = Bind::rw(workspace.sidecar_dir(), MOUNT_POINT);

        let init = OneShotJob::new(
            "sidecar-init",
            &self.config.image,
            ["config", "init", "--database", database.as_str()],
        )
        .with_bind(bind.clone());

        let admin = OneShotJob::new(
            "sidecar-admin",
            &self.config.image,
            [
                "users",
                "add",
                self.config.admin_user.as_str(),
                admin_password,
                "--database",
                database.as_str(),
                "--perm.admin",
            ],
        )
        .with_bind(bind)
        .sensitive();

        (init, admin)
    }
}
