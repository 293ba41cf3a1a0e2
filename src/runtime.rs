//! Seams to the container runtime and the compose tool
//!
//! The orchestrator only talks to these traits. [`crate::docker::DockerManager`]
//! and [`crate::compose::ComposeCli`] are the production implementations;
//! tests substitute in-memory fakes.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Host directory mounted into a one-shot container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Bind {
    pub fn rw(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    /// `host:container:mode`, the form the Docker API expects in `Binds`
    pub fn to_docker_bind(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host.display(),
            self.container,
            if self.read_only { "ro" } else { "rw" }
        )
    }
}

/// A container that runs a single command to completion and is removed
/// afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct OneShotJob {
    /// Short label for logs and errors, e.g. "sidecar-init"
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub binds: Vec<Bind>,
    /// Hide the command line from logs and errors (it carries credentials)
    pub sensitive: bool,
}

impl OneShotJob {
    pub fn new<I, S>(name: &str, image: &str, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            command: command.into_iter().map(Into::into).collect(),
            working_dir: None,
            binds: Vec::new(),
            sensitive: false,
        }
    }

    pub fn with_bind(mut self, bind: Bind) -> Self {
        self.binds.push(bind);
        self
    }

    pub fn with_working_dir(mut self, dir: &str) -> Self {
        self.working_dir = Some(dir.to_string());
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Command line safe to put in logs
    pub fn display_command(&self) -> String {
        if self.sensitive {
            "<redacted>".to_string()
        } else {
            shell_words::join(&self.command)
        }
    }
}

impl std::fmt::Debug for OneShotJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneShotJob")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("command", &self.display_command())
            .field("working_dir", &self.working_dir)
            .field("binds", &self.binds)
            .finish()
    }
}

/// Whether `ensure_network` found or created the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Existing,
    Created,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create the named network unless it already exists. A name conflict
    /// during creation counts as "exists".
    async fn ensure_network(&self, name: &str, driver: &str) -> anyhow::Result<NetworkStatus>;

    /// Run `job` to completion. A non-zero exit code is an error.
    async fn run_once(&self, job: &OneShotJob) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ComposeRunner: Send + Sync {
    /// Reconcile the manifest in `project_dir` with the running containers,
    /// detached, under the compose project `project_name`. A non-zero exit
    /// is an error.
    async fn up(&self, project_dir: &Path, project_name: &str) -> anyhow::Result<()>;
}

pub type SharedRuntime = Arc<dyn ContainerRuntime>;
pub type SharedCompose = Arc<dyn ComposeRunner>;
