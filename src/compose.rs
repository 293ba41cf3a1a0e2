//! `docker compose up -d` against a workspace

use crate::config::DeployConfig;
use crate::runtime::ComposeRunner;
use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs the compose tool as a child process
#[derive(Debug, Clone)]
pub struct ComposeCli {
    command: Vec<String>,
    fallback: Option<Vec<String>>,
    timeout: Duration,
}

impl ComposeCli {
    pub fn new(command: Vec<String>, fallback: Option<Vec<String>>, timeout: Duration) -> Self {
        Self {
            command,
            fallback: fallback.filter(|argv| !argv.is_empty()),
            timeout,
        }
    }

    pub fn from_config(config: &DeployConfig) -> anyhow::Result<Self> {
        let command = shell_words::split(&config.compose_command)
            .context("deploy.compose_command is not parseable")?;
        if command.is_empty() {
            anyhow::bail!("deploy.compose_command must not be empty");
        }
        let fallback = config
            .compose_fallback
            .as_deref()
            .map(shell_words::split)
            .transpose()
            .context("deploy.compose_fallback is not parseable")?;

        Ok(Self::new(command, fallback, config.step_timeout()))
    }

    /// Run `argv -p <project> up -d` in `dir`, forwarding output to tracing.
    ///
    /// `Err` with `NotFound` means the binary itself is missing.
    async fn run(&self, argv: &[String], dir: &Path, project: &str) -> std::io::Result<ExitStatus> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty compose command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .args(["-p", project, "up", "-d"])
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running: {:?}", cmd);
        let mut child = cmd.spawn()?;

        let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        let forward = async {
            loop {
                tokio::select! {
                    line = async { stdout.as_mut()?.next_line().await.ok().flatten() }, if stdout.is_some() => {
                        match line {
                            Some(line) => info!(target: "compose", "{}", line),
                            None => stdout = None,
                        }
                    }
                    line = async { stderr.as_mut()?.next_line().await.ok().flatten() }, if stderr.is_some() => {
                        match line {
                            // compose writes progress to stderr
                            Some(line) => info!(target: "compose", "{}", line),
                            None => stderr = None,
                        }
                    }
                    else => break,
                }
            }
            child.wait().await
        };

        match tokio::time::timeout(self.timeout, forward).await {
            Ok(status) => status,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("compose did not finish within {}s", self.timeout.as_secs()),
            )),
        }
    }
}

#[async_trait]
impl ComposeRunner for ComposeCli {
    async fn up(&self, project_dir: &Path, project_name: &str) -> anyhow::Result<()> {
        info!(dir = %project_dir.display(), project = project_name, "Bringing stack up");

        let status = match self.run(&self.command, project_dir, project_name).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let Some(fallback) = &self.fallback else {
                    return Err(anyhow::anyhow!(
                        "'{}' not found: {}",
                        shell_words::join(&self.command),
                        e
                    ));
                };
                warn!(
                    command = %shell_words::join(&self.command),
                    fallback = %shell_words::join(fallback),
                    "Compose command not found, trying fallback"
                );
                self.run(fallback, project_dir, project_name)
                    .await
                    .with_context(|| format!("Failed to run '{}'", shell_words::join(fallback)))?
            }
            other => other
                .with_context(|| format!("Failed to run '{}'", shell_words::join(&self.command)))?,
        };

        if !status.success() {
            anyhow::bail!(
                "compose exited with code {}",
                status.code().map_or_else(|| "none".to_string(), |c| c.to_string())
            );
        }

        info!(dir = %project_dir.display(), "Stack is up");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_from_config() {
        let config = DeployConfig::default();
        let cli = ComposeCli::from_config(&config).unwrap();
        assert_eq!(cli.command, argv(&["docker", "compose"]));
        assert_eq!(cli.fallback, Some(argv(&["docker-compose"])));
        assert_eq!(cli.timeout, Duration::from_secs(900));
    }

    #[test]
    fn test_empty_fallback_disabled() {
        let config = DeployConfig {
            compose_fallback: Some(String::new()),
            ..Default::default()
        };
        let cli = ComposeCli::from_config(&config).unwrap();
        assert!(cli.fallback.is_none());
    }

    #[tokio::test]
    async fn test_up_runs_in_project_dir() {
        let dir = TempDir::new().unwrap();
        // `sh -c '...' compose <args>`: $0 = compose, $@ = what was appended
        let cli = ComposeCli::new(
            argv(&["sh", "-c", "echo \"$*\" > args", "compose"]),
            None,
            Duration::from_secs(10),
        );

        cli.up(dir.path(), "u1_blog").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("args")).unwrap(),
            "-p u1_blog up -d\n"
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error_without_fallback() {
        let dir = TempDir::new().unwrap();
        let cli = ComposeCli::new(
            argv(&["sh", "-c", "echo boom >&2; exit 3", "compose"]),
            Some(argv(&["sh", "-c", "touch fallback-ran", "compose"])),
            Duration::from_secs(10),
        );

        let err = cli.up(dir.path(), "u1_blog").await.unwrap_err();
        assert!(err.to_string().contains("code 3"));
        assert!(!dir.path().join("fallback-ran").exists());
    }

    #[tokio::test]
    async fn test_missing_binary_uses_fallback() {
        let dir = TempDir::new().unwrap();
        let cli = ComposeCli::new(
            argv(&["stackgate-definitely-missing-binary"]),
            Some(argv(&["sh", "-c", "touch fallback-ran", "compose"])),
            Duration::from_secs(10),
        );

        cli.up(dir.path(), "u1_blog").await.unwrap();
        assert!(dir.path().join("fallback-ran").exists());
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = TempDir::new().unwrap();
        let cli = ComposeCli::new(argv(&["sh", "-c", "sleep 5", "compose"]), None, Duration::from_millis(100));

        let err = cli.up(dir.path(), "u1_blog").await.unwrap_err();
        assert!(format!("{:#}", err).contains("did not finish"));
    }
}
