//! Request dispatch and the deploy pipeline
//!
//! ```text
//! network -> workspace -> archive? -> sidecar -> scaffold? -> manifest -> compose up
//! ```
//!
//! Every stack type runs the same pipeline; per-type differences come from
//! its [`crate::stack::StackDescriptor`].

use crate::archive;
use crate::config::Config;
use crate::error::DeployError;
use crate::manifest::{self, ManifestContext};
use crate::request::{DeployRequest, RawDeployRequest};
use crate::runtime::{NetworkStatus, SharedCompose, SharedRuntime};
use crate::scaffold::{ScaffoldOutcome, Scaffolder};
use crate::sidecar::{SidecarOutcome, SidecarProvisioner};
use crate::stack::StackType;
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Summary of a deploy that reached `compose up` successfully
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub deploy_id: Uuid,
    pub stack_type: StackType,
    pub owner_id: String,
    pub project_name: String,
    pub workspace: PathBuf,
    pub manifest_path: PathBuf,
    pub compose_project: String,
    /// Public hostname of the primary service
    pub hostname: String,
    pub sidecar_hostname: String,
    pub sidecar: SidecarOutcome,
    pub scaffold: ScaffoldOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

pub struct StackOrchestrator {
    config: Config,
    runtime: SharedRuntime,
    compose: SharedCompose,
    /// Set once the shared network is known to exist
    network: OnceCell<NetworkStatus>,
    /// One lock per `owner/project`
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StackOrchestrator {
    pub fn new(config: Config, runtime: SharedRuntime, compose: SharedCompose) -> Arc<Self> {
        Arc::new(Self {
            config,
            runtime,
            compose,
            network: OnceCell::new(),
            locks: DashMap::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Make sure the shared network exists. Runs against the runtime at most
    /// once per process; a failed attempt is retried by the next caller.
    pub async fn ensure_network(&self) -> Result<NetworkStatus, DeployError> {
        let network = &self.config.network;
        self.network
            .get_or_try_init(|| async {
                let status = self
                    .runtime
                    .ensure_network(&network.name, &network.driver)
                    .await
                    .map_err(|e| DeployError::Network {
                        network: network.name.clone(),
                        reason: format!("{:#}", e),
                    })?;
                info!(network = %network.name, ?status, "Shared network ready");
                Ok::<_, DeployError>(status)
            })
            .await
            .copied()
    }

    /// Entry point for requests coming from the API layer. Parsing and
    /// validation happen before anything touches disk or Docker.
    pub async fn handle_request(&self, raw: RawDeployRequest) -> Result<DeployReport, DeployError> {
        let request = DeployRequest::try_from(raw).map_err(|e| {
            error!(error = %e, "Rejected deploy request");
            e
        })?;
        self.deploy(request).await
    }

    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployReport, DeployError> {
        let deploy_id = Uuid::new_v4();
        let span = info_span!(
            "deploy",
            %deploy_id,
            stack = %request.stack_type,
            owner = %request.owner_id,
            project = %request.project_name,
        );

        async move {
            let result = self.run_pipeline(deploy_id, &request).await;
            match &result {
                Ok(report) => info!(duration_secs = report.duration_secs, "Deploy finished"),
                Err(e) => error!(code = e.code().as_str(), error = %e, "Deploy failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_pipeline(
        &self,
        deploy_id: Uuid,
        request: &DeployRequest,
    ) -> Result<DeployReport, DeployError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        self.ensure_network().await?;

        // Deploys against the same workspace run one at a time
        let key = request.workspace_key();
        let lock = Arc::clone(self.locks.entry(key.clone()).or_default().value());
        let result = {
            let _guard = lock.lock().await;
            self.run_locked(deploy_id, request, started_at, clock).await
        };
        drop(lock);
        // Nobody else holds or waits on it: forget the key
        self.locks.remove_if(&key, |_, held| Arc::strong_count(held) == 1);

        result
    }

    async fn run_locked(
        &self,
        deploy_id: Uuid,
        request: &DeployRequest,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> Result<DeployReport, DeployError> {
        let descriptor = request.stack_type.descriptor();

        let workspace = Workspace::allocate(
            &self.config.paths.base_dir,
            &request.owner_id,
            &request.project_name,
        )
        .await?;
        info!(root = %workspace.root().display(), "Workspace allocated");

        if let Some(archive_path) = &request.archive_path {
            archive::import(archive_path, &workspace.data_dir()).await?;
        }

        let password = request
            .admin_password
            .as_deref()
            .unwrap_or(self.config.sidecar.default_admin_password.as_str());
        let sidecar = SidecarProvisioner::new(self.runtime.as_ref(), &self.config.sidecar)
            .provision(&workspace, password)
            .await?;

        let scaffold = match (descriptor.scaffold, &request.archive_path) {
            (_, Some(_)) => ScaffoldOutcome::Skipped {
                reason: "archive supplied".to_string(),
            },
            (None, None) => ScaffoldOutcome::Skipped {
                reason: format!("{} has no starter project", request.stack_type),
            },
            (Some(scaffold), None) => {
                Scaffolder::new(self.runtime.as_ref())
                    .run(scaffold, &workspace.data_dir())
                    .await
            }
        };

        let text = manifest::render(
            descriptor,
            &ManifestContext::from_config(&self.config, &request.project_name),
        );
        let manifest_path = manifest::write(&workspace, &text)?;

        let compose_project = request.compose_project();
        self.compose
            .up(workspace.root(), &compose_project)
            .await
            .map_err(|e| DeployError::Convergence {
                dir: workspace.root().to_path_buf(),
                reason: format!("{:#}", e),
            })?;

        Ok(DeployReport {
            deploy_id,
            stack_type: request.stack_type,
            owner_id: request.owner_id.clone(),
            project_name: request.project_name.clone(),
            workspace: workspace.root().to_path_buf(),
            manifest_path,
            compose_project,
            hostname: self.config.routing.hostname(&request.project_name),
            sidecar_hostname: self.config.routing.sidecar_hostname(&request.project_name),
            sidecar,
            scaffold,
            started_at,
            duration_secs: clock.elapsed().as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ComposeRunner, ContainerRuntime, OneShotJob};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRuntime {
        network_calls: AtomicUsize,
        fail_network: bool,
    }

    #[async_trait]
    impl ContainerRuntime for CountingRuntime {
        async fn ensure_network(&self, _: &str, _: &str) -> anyhow::Result<NetworkStatus> {
            self.network_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_network {
                anyhow::bail!("daemon unreachable");
            }
            Ok(NetworkStatus::Created)
        }

        async fn run_once(&self, _: &OneShotJob) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NoopCompose;

    #[async_trait]
    impl ComposeRunner for NoopCompose {
        async fn up(&self, _: &Path, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn orchestrator(runtime: Arc<CountingRuntime>) -> Arc<StackOrchestrator> {
        StackOrchestrator::new(Config::default(), runtime, Arc::new(NoopCompose))
    }

    #[tokio::test]
    async fn test_workspace_locks_released() {
        let base = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.base_dir = base.path().to_path_buf();
        config.sidecar.reuse_existing_database = true;
        let orch = StackOrchestrator::new(
            config,
            Arc::new(CountingRuntime::default()),
            Arc::new(NoopCompose),
        );

        let handles: Vec<_> = ["a", "b", "a", "c"]
            .into_iter()
            .map(|project| {
                let orch = orch.clone();
                tokio::spawn(async move {
                    let request = DeployRequest::new(StackType::Static, "u1", project).unwrap();
                    orch.deploy(request).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(orch.locks.is_empty());

        // a failed deploy releases its key too
        let missing = DeployRequest::new(StackType::Static, "u1", "d")
            .unwrap()
            .with_archive(base.path().join("missing.zip"));
        assert!(orch.deploy(missing).await.is_err());
        assert!(orch.locks.is_empty());
    }

    #[tokio::test]
    async fn test_network_ensured_once() {
        let runtime = Arc::new(CountingRuntime::default());
        let orch = orchestrator(runtime.clone());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orch = orch.clone();
                tokio::spawn(async move { orch.ensure_network().await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), NetworkStatus::Created);
        }

        assert_eq!(runtime.network_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_network_failure_is_retried() {
        let runtime = Arc::new(CountingRuntime {
            fail_network: true,
            ..Default::default()
        });
        let orch = orchestrator(runtime.clone());

        let err = orch.ensure_network().await.unwrap_err();
        assert!(matches!(err, DeployError::Network { ref network, .. } if network == "caddy_net"));
        assert!(orch.ensure_network().await.is_err());
        assert_eq!(runtime.network_calls.load(Ordering::SeqCst), 2);
    }
}
