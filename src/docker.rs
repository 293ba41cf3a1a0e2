//! Docker daemon access for one-shot jobs and the shared network

use crate::config::PullPolicy;
use crate::runtime::{ContainerRuntime, NetworkStatus, OneShotJob};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lines of container output attached to a failed job's error
const LOG_TAIL_LINES: usize = 20;

/// Talks to the Docker daemon on behalf of the provisioner
pub struct DockerManager {
    client: Docker,
    pull_policy: PullPolicy,
    job_timeout: Duration,
}

impl DockerManager {
    /// Connect to the Docker daemon
    ///
    /// Connection priority:
    /// 1. Explicit docker_host parameter
    /// 2. DOCKER_HOST environment variable
    /// 3. Common socket paths (platform-specific)
    pub async fn new(
        docker_host: Option<&str>,
        pull_policy: PullPolicy,
        job_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = if let Some(host) = docker_host {
            Self::connect_to_host(host).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to connect to Docker at '{}': {}. \
                     Ensure Docker is running and the socket path is correct.",
                    host, e
                )
            })?
        } else if let Ok(host) = std::env::var("DOCKER_HOST") {
            Self::connect_to_host(&host).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to connect to Docker via DOCKER_HOST='{}': {}. \
                     Ensure Docker is running and accessible.",
                    host, e
                )
            })?
        } else {
            Self::connect_with_defaults().await?
        };

        client.ping().await.map_err(|e| {
            anyhow::anyhow!(
                "Docker daemon is not responding: {}. \
                 Ensure Docker Desktop, Colima, or dockerd is running.",
                e
            )
        })?;

        debug!("Connected to Docker daemon");
        Ok(Self {
            client,
            pull_policy,
            job_timeout,
        })
    }

    fn connect_to_host(host: &str) -> anyhow::Result<Docker> {
        if let Some(socket_path) = host.strip_prefix("unix://") {
            Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| anyhow::anyhow!("Cannot connect to Unix socket '{}': {}", socket_path, e))
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| anyhow::anyhow!("Cannot connect to TCP endpoint '{}': {}", host, e))
        } else {
            anyhow::bail!(
                "Invalid docker_host format: '{}'. Expected 'unix:///path/to/socket' or 'tcp://host:port'",
                host
            )
        }
    }

    async fn connect_with_defaults() -> anyhow::Result<Docker> {
        let home = std::env::var("HOME").unwrap_or_default();
        let xdg_runtime = std::env::var("XDG_RUNTIME_DIR").unwrap_or_default();

        let socket_paths: Vec<(&str, String)> = vec![
            ("Linux default", "/var/run/docker.sock".to_string()),
            ("Docker Desktop (macOS)", format!("{}/.docker/run/docker.sock", home)),
            ("Colima (macOS)", format!("{}/.colima/default/docker.sock", home)),
            ("Podman (Linux)", format!("{}/podman/podman.sock", xdg_runtime)),
        ];

        let mut tried_paths = Vec::new();

        for (name, path) in &socket_paths {
            if path.starts_with('/') && std::path::Path::new(path).exists() {
                debug!(path, name, "Found Docker socket");
                match Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION) {
                    Ok(client) => {
                        if client.ping().await.is_ok() {
                            return Ok(client);
                        }
                        tried_paths.push(format!("{} ({}) - daemon not responding", path, name));
                    }
                    Err(e) => {
                        tried_paths.push(format!("{} ({}) - connection failed: {}", path, name, e));
                    }
                }
            }
        }

        Docker::connect_with_socket_defaults().map_err(|e| {
            let tried_info = if tried_paths.is_empty() {
                "No Docker socket found at common locations".to_string()
            } else {
                format!("Tried:\n  - {}", tried_paths.join("\n  - "))
            };
            anyhow::anyhow!(
                "Cannot connect to Docker daemon. {}\n\
                 Start dockerd, set DOCKER_HOST, or set docker.docker_host in the configuration.\n\
                 Underlying error: {}",
                tried_info, e
            )
        })
    }

    /// Pull an image according to the configured pull policy
    pub async fn pull_image_if_needed(&self, image: &str) -> anyhow::Result<()> {
        let should_pull = match self.pull_policy {
            PullPolicy::Always => true,
            PullPolicy::Never => {
                if self.client.inspect_image(image).await.is_err() {
                    anyhow::bail!(
                        "Image '{}' not found locally and pull_policy is 'never'",
                        image
                    );
                }
                false
            }
            PullPolicy::IfNotPresent => self.client.inspect_image(image).await.is_err(),
        };

        if !should_pull {
            debug!(image, "Image exists locally, skipping pull");
            return Ok(());
        }

        let (from_image, tag) = split_image_reference(image);
        info!(image, tag, "Pulling Docker image");
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(error) = progress.error {
                        anyhow::bail!("Failed to pull image '{}': {}", image, error);
                    }
                    if let Some(status) = progress.status {
                        debug!(image, status, "Pull progress");
                    }
                }
                Err(e) => anyhow::bail!("Failed to pull image '{}': {}", image, e),
            }
        }

        info!(image, "Image pulled successfully");
        Ok(())
    }

    /// Start the job's container and wait for it to exit. Returns the exit code.
    async fn start_and_wait(&self, container_id: &str) -> anyhow::Result<i64> {
        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start container: {}", e))?;

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait = self.client.wait_container(container_id, Some(options));

        match wait.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(anyhow::anyhow!("Failed waiting for container: {}", e)),
            None => Err(anyhow::anyhow!("Container wait stream ended without a status")),
        }
    }

    /// Last lines of combined stdout/stderr
    async fn log_tail(&self, container_id: &str) -> String {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: LOG_TAIL_LINES.to_string(),
            ..Default::default()
        };

        let mut lines = Vec::new();
        let mut stream = self.client.logs(container_id, Some(options));
        while let Some(Ok(output)) = stream.next().await {
            let message = match output {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => message,
                LogOutput::StdIn { .. } => continue,
            };
            let text = String::from_utf8_lossy(&message);
            lines.extend(
                text.lines()
                    .map(str::trim_end)
                    .filter(|l| !l.is_empty())
                    .map(String::from),
            );
        }
        lines.join("\n")
    }

    /// Remove a container, ignoring "not found"
    async fn remove_container(&self, container_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.client.remove_container(container_id, Some(options)).await {
            Ok(_) => debug!(container_id, "Removed Docker container"),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => debug!(container_id, "Container already gone"),
            Err(e) => warn!(container_id, error = %e, "Failed to remove container"),
        }
    }
}

/// Split `name[:tag]` or `name@digest` into the `fromImage`/`tag` pair of
/// `/images/create`. An empty tag would pull every tag of the repository, so
/// an untagged name means `latest`.
fn split_image_reference(image: &str) -> (&str, &str) {
    if let Some((name, digest)) = image.split_once('@') {
        return (name, digest);
    }
    // A ':' before the last '/' belongs to a registry port
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

/// Bound `fut` by `limit`
async fn within<T>(
    limit: Duration,
    what: &str,
    fut: impl std::future::Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| anyhow::anyhow!("{} did not finish within {}s", what, limit.as_secs()))?
}

/// Unique per run so a leftover container never blocks the next attempt
fn unique_container_name(job: &str) -> String {
    format!("stackgate-{}-{}", job, uuid::Uuid::new_v4().simple())
}

#[async_trait]
impl ContainerRuntime for DockerManager {
    async fn ensure_network(&self, name: &str, driver: &str) -> anyhow::Result<NetworkStatus> {
        match self.client.inspect_network::<String>(name, None).await {
            Ok(_) => {
                debug!(network = name, "Network already exists");
                return Ok(NetworkStatus::Existing);
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(anyhow::anyhow!("Failed to inspect network '{}': {}", name, e)),
        }

        info!(network = name, driver, "Creating Docker network");
        match self
            .client
            .create_network(CreateNetworkOptions {
                name,
                driver,
                ..Default::default()
            })
            .await
        {
            Ok(_) => Ok(NetworkStatus::Created),
            // Another process created it between inspect and create
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(NetworkStatus::Existing),
            Err(e) => Err(anyhow::anyhow!("Failed to create network '{}': {}", name, e)),
        }
    }

    async fn run_once(&self, job: &OneShotJob) -> anyhow::Result<()> {
        within(
            self.job_timeout,
            &format!("pulling '{}'", job.image),
            self.pull_image_if_needed(&job.image),
        )
        .await?;

        let container_name = unique_container_name(&job.name);
        let host_config = HostConfig {
            binds: Some(job.binds.iter().map(|b| b.to_docker_bind()).collect()),
            ..Default::default()
        };
        let container_config = Config {
            image: Some(job.image.clone()),
            cmd: Some(job.command.clone()),
            working_dir: job.working_dir.clone(),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create container '{}' from image '{}': {}",
                    container_name, job.image, e
                )
            })?;
        let container_id = response.id;

        info!(
            job = %job.name,
            image = %job.image,
            command = %job.display_command(),
            container_id,
            "Running one-shot container"
        );

        let outcome = tokio::time::timeout(self.job_timeout, self.start_and_wait(&container_id)).await;

        let result = match outcome {
            Ok(Ok(0)) => {
                info!(job = %job.name, "One-shot container finished");
                Ok(())
            }
            Ok(Ok(code)) => {
                let tail = self.log_tail(&container_id).await;
                Err(anyhow::anyhow!(
                    "'{}' exited with status {}{}",
                    job.name,
                    code,
                    if tail.is_empty() {
                        String::new()
                    } else {
                        format!(":\n{}", tail)
                    }
                ))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow::anyhow!(
                "'{}' did not finish within {}s",
                job.name,
                self.job_timeout.as_secs()
            )),
        };

        // Force removal also stops a container that timed out
        self.remove_container(&container_id).await;
        result
    }
}
