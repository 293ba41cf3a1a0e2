//! stackgate - deploy per-project container stacks
//!
//! Usage:
//!   stackgate [--config <path>] deploy <type> <owner> <project> [--archive <zip>] [--password <pw>]
//!   stackgate [--config <path>] render <type> <project>
//!   stackgate [--config <path>] check

use anyhow::Context;
use stackgate::compose::ComposeCli;
use stackgate::config::Config;
use stackgate::docker::DockerManager;
use stackgate::error::{DeployError, ErrorResponse};
use stackgate::manifest::{self, ManifestContext};
use stackgate::orchestrator::StackOrchestrator;
use stackgate::request::{self, DeployRequest, RawDeployRequest};
use stackgate::stack::StackType;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Looked up in the working directory when `--config` is not given
const DEFAULT_CONFIG: &str = "stackgate.toml";

#[derive(Debug)]
enum Command {
    Deploy {
        stack_type: String,
        owner: String,
        project: String,
        archive: Option<PathBuf>,
        password: Option<String>,
    },
    Render {
        stack_type: String,
        project: String,
    },
    Check,
    Help,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries the JSON result
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stackgate=debug".parse().expect("valid log directive")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (config_path, rest) = match split_config_flag(args) {
        Ok(split) => split,
        Err(msg) => usage_error(&msg),
    };
    let command = match parse_command(&rest) {
        Ok(command) => command,
        Err(msg) => usage_error(&msg),
    };

    if let Err(e) = run(command, config_path.as_deref()).await {
        match e.downcast_ref::<DeployError>() {
            Some(deploy_err) => println!("{}", ErrorResponse::from(deploy_err).to_json()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn usage_error(msg: &str) -> ! {
    eprintln!("Error: {}\n", msg);
    print_help();
    std::process::exit(2);
}

async fn run(command: Command, config_path: Option<&Path>) -> anyhow::Result<()> {
    match command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Render {
            stack_type,
            project,
        } => {
            let config = load_config(config_path)?;
            let stack: StackType = stack_type.parse()?;
            request::validate_project_name(&project)?;
            print!(
                "{}",
                manifest::render(
                    stack.descriptor(),
                    &ManifestContext::from_config(&config, &project)
                )
            );
            Ok(())
        }
        Command::Check => {
            let config = load_config(config_path)?;
            let orchestrator = connect(config).await?;
            let status = orchestrator.ensure_network().await?;
            println!(
                "{}",
                serde_json::json!({
                    "network": orchestrator.config().network.name,
                    "status": status,
                })
            );
            Ok(())
        }
        Command::Deploy {
            stack_type,
            owner,
            project,
            archive,
            password,
        } => {
            let config = load_config(config_path)?;
            // Reject bad requests before touching Docker
            let request = DeployRequest::try_from(RawDeployRequest {
                stack_type,
                owner_id: owner,
                project_name: project,
                archive_path: archive,
                admin_password: password,
            })?;

            let orchestrator = connect(config).await?;
            let report = orchestrator.deploy(request).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).is_file() => Config::load(DEFAULT_CONFIG)
            .with_context(|| format!("Failed to load configuration from {}", DEFAULT_CONFIG))?,
        None => {
            let mut config = Config::default();
            config.resolve_paths()?;
            config.validate()?;
            config
        }
    };

    info!(base_dir = %config.paths.base_dir.display(), "Configuration loaded");
    Ok(config)
}

async fn connect(config: Config) -> anyhow::Result<Arc<StackOrchestrator>> {
    let docker = DockerManager::new(
        config.docker.docker_host.as_deref(),
        config.docker.pull_policy.clone(),
        config.deploy.step_timeout(),
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Docker is not available");
        e
    })?;
    let compose = ComposeCli::from_config(&config.deploy)?;

    Ok(StackOrchestrator::new(
        config,
        Arc::new(docker),
        Arc::new(compose),
    ))
}

/// Pull `--config <path>` out of the arguments, wherever it appears
fn split_config_flag(args: Vec<String>) -> Result<(Option<PathBuf>, Vec<String>), String> {
    let mut config = None;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        if arg == "--config" || arg == "-c" {
            let path = iter.next().ok_or("--config requires a path")?;
            config = Some(PathBuf::from(path));
        } else if let Some(path) = arg.strip_prefix("--config=") {
            config = Some(PathBuf::from(path));
        } else {
            rest.push(arg);
        }
    }

    Ok((config, rest))
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let Some(first) = args.first() else {
        return Ok(Command::Help);
    };

    match first.as_str() {
        "help" | "--help" | "-h" => Ok(Command::Help),
        "deploy" => parse_deploy_command(&args[1..]),
        "render" => {
            let [stack_type, project] = &args[1..] else {
                return Err("usage: render <type> <project>".to_string());
            };
            Ok(Command::Render {
                stack_type: stack_type.clone(),
                project: project.clone(),
            })
        }
        "check" => Ok(Command::Check),
        other => Err(format!("unknown command '{}'", other)),
    }
}

fn parse_deploy_command(args: &[String]) -> Result<Command, String> {
    let mut positional = Vec::new();
    let mut archive = None;
    let mut password = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--archive" | "-a" => {
                archive = Some(PathBuf::from(iter.next().ok_or("--archive requires a path")?));
            }
            "--password" | "-p" => {
                password = Some(iter.next().ok_or("--password requires a value")?.clone());
            }
            flag if flag.starts_with('-') => return Err(format!("unknown option '{}'", flag)),
            _ => positional.push(arg.clone()),
        }
    }

    let [stack_type, owner, project]: [String; 3] = positional
        .try_into()
        .map_err(|_| "usage: deploy <type> <owner> <project> [--archive <zip>] [--password <pw>]".to_string())?;

    Ok(Command::Deploy {
        stack_type,
        owner,
        project,
        archive,
        password,
    })
}

fn print_help() {
    println!(
        r#"
stackgate - per-project container stacks behind a shared reverse proxy

USAGE:
    stackgate [--config <path>] <command> [options]

COMMANDS:
    deploy <type> <owner> <project>   Create the workspace and bring the stack up
        --archive <zip>               Import this zip into data/ (deleted afterwards)
        --password <pw>               Sidecar admin password
    render <type> <project>           Print the manifest without deploying
    check                             Validate config, reach Docker, ensure the network

STACK TYPES:
    static, php, laravel, node, react, next

OPTIONS:
    --config <path>                   Configuration file (default: ./stackgate.toml)

ENVIRONMENT:
    RUST_LOG                          Log filter (logs are written to stderr)
    DOCKER_HOST                       Docker daemon address
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_parse_deploy() {
        let command = parse_command(&args(&[
            "deploy", "Node", "u1", "blog", "--archive", "/tmp/up.zip", "--password", "pw",
        ]))
        .unwrap();

        match command {
            Command::Deploy {
                stack_type,
                owner,
                project,
                archive,
                password,
            } => {
                assert_eq!(stack_type, "Node");
                assert_eq!(owner, "u1");
                assert_eq!(project, "blog");
                assert_eq!(archive, Some(PathBuf::from("/tmp/up.zip")));
                assert_eq!(password.as_deref(), Some("pw"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_deploy_errors() {
        assert!(parse_command(&args(&["deploy", "Node", "u1"])).is_err());
        assert!(parse_command(&args(&["deploy", "Node", "u1", "blog", "--archive"])).is_err());
        assert!(parse_command(&args(&["deploy", "Node", "u1", "blog", "--force"])).is_err());
    }

    #[test]
    fn test_parse_render_and_check() {
        assert!(matches!(
            parse_command(&args(&["render", "php", "shop"])).unwrap(),
            Command::Render { ref project, .. } if project == "shop"
        ));
        assert!(parse_command(&args(&["render", "php"])).is_err());
        assert!(matches!(parse_command(&args(&["check"])).unwrap(), Command::Check));
        assert!(matches!(parse_command(&[]).unwrap(), Command::Help));
        assert!(parse_command(&args(&["destroy"])).is_err());
    }

    #[test]
    fn test_split_config_flag() {
        let (config, rest) =
            split_config_flag(args(&["check", "--config", "/etc/stackgate.toml"])).unwrap();
        assert_eq!(config, Some(PathBuf::from("/etc/stackgate.toml")));
        assert_eq!(rest, args(&["check"]));

        let (config, _) = split_config_flag(args(&["--config=a.toml", "check"])).unwrap();
        assert_eq!(config, Some(PathBuf::from("a.toml")));

        assert!(split_config_flag(args(&["check", "--config"])).is_err());
    }
}
