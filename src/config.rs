use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration for the provisioner
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Where workspaces live on disk
    #[serde(default)]
    pub paths: PathsConfig,

    /// Shared reverse-proxy network
    #[serde(default)]
    pub network: NetworkConfig,

    /// Hostnames handed to the reverse proxy
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Docker daemon connection
    #[serde(default)]
    pub docker: DockerConfig,

    /// File-management sidecar
    #[serde(default)]
    pub sidecar: SidecarConfig,

    /// Deploy pipeline tuning
    #[serde(default)]
    pub deploy: DeployConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Root under which `<owner>/<project>/` workspaces are created
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Network every primary service and sidecar joins (default: caddy_net)
    #[serde(default = "default_network_name")]
    pub name: String,

    /// Driver used when the network has to be created (default: bridge)
    #[serde(default = "default_network_driver")]
    pub driver: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: default_network_name(),
            driver: default_network_driver(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoutingConfig {
    /// Public domain; projects are served at `<project>.<domain>`
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Prefix for the sidecar hostname (`fb-<project>.<domain>`)
    #[serde(default = "default_sidecar_prefix")]
    pub sidecar_prefix: String,
}

impl RoutingConfig {
    pub fn hostname(&self, project: &str) -> String {
        format!("{}.{}", project, self.domain)
    }

    pub fn sidecar_hostname(&self, project: &str) -> String {
        format!("{}{}.{}", self.sidecar_prefix, project, self.domain)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            sidecar_prefix: default_sidecar_prefix(),
        }
    }
}

/// Image pull policy for one-shot containers
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// Pull if image doesn't exist locally (default)
    #[default]
    #[serde(alias = "if-not-present")]
    IfNotPresent,
    /// Always pull before running
    Always,
    /// Never pull, fail if image doesn't exist
    Never,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DockerConfig {
    /// Docker host URL (default: DOCKER_HOST, then common socket paths)
    pub docker_host: Option<String>,

    /// Pull policy for one-shot job images
    #[serde(default)]
    pub pull_policy: PullPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SidecarConfig {
    /// Image used for the one-shot database and user commands
    #[serde(default = "default_sidecar_image")]
    pub image: String,

    /// Image referenced by the long-running sidecar service in the manifest
    #[serde(default = "default_sidecar_service_image")]
    pub service_image: String,

    /// Administrative account created on first deploy
    #[serde(default = "default_admin_user")]
    pub admin_user: String,

    /// Password used when the request doesn't carry one
    #[serde(default = "default_admin_password")]
    pub default_admin_password: String,

    /// Skip database init and admin creation when the database file already
    /// exists. Off by default: a redeploy then fails in provisioning.
    #[serde(default)]
    pub reuse_existing_database: bool,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            image: default_sidecar_image(),
            service_image: default_sidecar_service_image(),
            admin_user: default_admin_user(),
            default_admin_password: default_admin_password(),
            reuse_existing_database: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeployConfig {
    /// Upper bound for each one-shot container and the compose invocation
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Command line used to reach the compose tool (default: "docker compose")
    #[serde(default = "default_compose_command")]
    pub compose_command: String,

    /// Tried only when `compose_command` cannot be spawned at all (empty disables)
    #[serde(default = "default_compose_fallback")]
    pub compose_fallback: Option<String>,
}

impl DeployConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            compose_command: default_compose_command(),
            compose_fallback: default_compose_fallback(),
        }
    }
}

// Default value functions
fn default_base_dir() -> PathBuf {
    dirs_next::data_dir()
        .map(|dir| dir.join("stackgate").join("srv"))
        .unwrap_or_else(|| PathBuf::from("/srv"))
}

/// `path` joined onto `cwd` when relative, with `.` components dropped
fn absolute_from(cwd: &Path, path: &Path) -> PathBuf {
    cwd.join(path)
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

fn default_network_name() -> String {
    "caddy_net".to_string()
}

fn default_network_driver() -> String {
    "bridge".to_string()
}

fn default_domain() -> String {
    "quiere.cafe".to_string()
}

fn default_sidecar_prefix() -> String {
    "fb-".to_string()
}

fn default_sidecar_image() -> String {
    "filebrowser/filebrowser".to_string()
}

fn default_sidecar_service_image() -> String {
    "filebrowser/filebrowser:latest".to_string()
}

fn default_admin_user() -> String {
    "admin".to_string()
}

fn default_admin_password() -> String {
    "admin123".to_string()
}

fn default_step_timeout() -> u64 {
    900 // npm and composer installs are slow
}

fn default_compose_command() -> String {
    "docker compose".to_string()
}

fn default_compose_fallback() -> Option<String> {
    Some("docker-compose".to_string())
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.resolve_paths()?;
        config.validate()?;
        Ok(config)
    }

    /// Anchor a relative `base_dir` at the current directory. Workspace paths
    /// end up as Docker bind sources, which must be absolute.
    pub fn resolve_paths(&mut self) -> anyhow::Result<()> {
        if self.paths.base_dir.is_relative() {
            let cwd = std::env::current_dir()?;
            self.paths.base_dir = absolute_from(&cwd, &self.paths.base_dir);
        }
        Ok(())
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if !self.paths.base_dir.is_absolute() {
            errors.push(format!(
                "paths.base_dir '{}' must be an absolute path",
                self.paths.base_dir.display()
            ));
        }
        if self.network.name.trim().is_empty() {
            errors.push("network.name must not be empty".to_string());
        }
        if self.network.driver.trim().is_empty() {
            errors.push("network.driver must not be empty".to_string());
        }

        let domain = &self.routing.domain;
        if domain.is_empty() {
            errors.push("routing.domain must not be empty".to_string());
        } else if domain
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '/')
        {
            errors.push(format!("routing.domain '{}' is not a valid domain", domain));
        }

        if self.sidecar.admin_user.trim().is_empty() {
            errors.push("sidecar.admin_user must not be empty".to_string());
        }
        if self.sidecar.image.trim().is_empty() || self.sidecar.service_image.trim().is_empty() {
            errors.push("sidecar images must not be empty".to_string());
        }

        if self.deploy.step_timeout_secs == 0 {
            errors.push("deploy.step_timeout_secs must be greater than 0".to_string());
        }
        match shell_words::split(&self.deploy.compose_command) {
            Ok(argv) if !argv.is_empty() => {}
            Ok(_) => errors.push("deploy.compose_command must not be empty".to_string()),
            Err(e) => errors.push(format!("deploy.compose_command is not parseable: {}", e)),
        }
        // An empty fallback disables it
        if let Some(fallback) = &self.deploy.compose_fallback {
            if let Err(e) = shell_words::split(fallback) {
                errors.push(format!("deploy.compose_fallback is not parseable: {}", e));
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
