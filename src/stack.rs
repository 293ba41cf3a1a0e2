//! Supported stack types and the service topology each one deploys
//!
//! Every stack is one primary service plus the file-management sidecar. The
//! differences between stack types live entirely in [`StackDescriptor`], so
//! adding a stack type means adding a table entry.

use crate::error::DeployError;
use crate::scaffold::Scaffold;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Closed set of stack types the provisioner knows how to deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackType {
    Static,
    Php,
    Laravel,
    Node,
    React,
    Next,
}

impl StackType {
    pub const ALL: [StackType; 6] = [
        StackType::Static,
        StackType::Php,
        StackType::Laravel,
        StackType::Node,
        StackType::React,
        StackType::Next,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StackType::Static => "static",
            StackType::Php => "php",
            StackType::Laravel => "laravel",
            StackType::Node => "node",
            StackType::React => "react",
            StackType::Next => "next",
        }
    }

    pub fn descriptor(&self) -> &'static StackDescriptor {
        match self {
            StackType::Static => &STATIC,
            StackType::Php => &PHP,
            StackType::Laravel => &LARAVEL,
            StackType::Node => &NODE,
            StackType::React => &REACT,
            StackType::Next => &NEXT,
        }
    }
}

impl std::fmt::Display for StackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StackType {
    type Err = DeployError;

    /// Case-insensitive; also accepts the tags the web API has always sent
    /// (`Estatico`, `PHP`, `Node`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" | "estatico" | "estático" => Ok(StackType::Static),
            "php" => Ok(StackType::Php),
            "laravel" => Ok(StackType::Laravel),
            "node" | "nodejs" | "node.js" => Ok(StackType::Node),
            "react" | "react-vite" | "vite" => Ok(StackType::React),
            "next" | "nextjs" | "next.js" => Ok(StackType::Next),
            _ => Err(DeployError::UnsupportedStackType(s.to_string())),
        }
    }
}

/// Extra one-shot service declared next to the primary one (Laravel's
/// `composer install`). It mounts `./data` at the same target as the primary.
#[derive(Debug)]
pub struct CompanionService {
    pub name: &'static str,
    pub image: &'static str,
    pub command: &'static str,
}

/// Per-stack-type parameters for the manifest and the scaffold step
#[derive(Debug)]
pub struct StackDescriptor {
    /// Service name of the primary container in the manifest
    pub service: &'static str,
    pub image: &'static str,
    /// Where `./data` is mounted inside the primary container
    pub mount_target: &'static str,
    pub working_dir: Option<&'static str>,
    pub command: Option<&'static str>,
    /// Port the primary service listens on; advertised to the proxy
    pub port: u16,
    pub environment: &'static [&'static str],
    pub companion: Option<CompanionService>,
    /// Starter project generated when no archive is supplied
    pub scaffold: Option<Scaffold>,
}

static STATIC: StackDescriptor = StackDescriptor {
    service: "httpd",
    image: "httpd:latest",
    mount_target: "/usr/local/apache2/htdocs/",
    working_dir: None,
    command: None,
    port: 80,
    environment: &[],
    companion: None,
    scaffold: None,
};

static PHP: StackDescriptor = StackDescriptor {
    service: "php-apache",
    image: "php:8.3-apache",
    mount_target: "/var/www/html",
    working_dir: None,
    command: None,
    port: 80,
    environment: &[],
    companion: None,
    scaffold: None,
};

static LARAVEL: StackDescriptor = StackDescriptor {
    service: "laravel",
    image: "php:8.3-cli",
    mount_target: "/var/www",
    working_dir: Some("/var/www"),
    command: Some("php artisan serve --host=0.0.0.0 --port=8000"),
    port: 8000,
    environment: &[],
    companion: Some(CompanionService {
        name: "composer",
        image: "composer:latest",
        command: "composer install",
    }),
    scaffold: Some(Scaffold::LaravelSkeleton),
};

static NODE: StackDescriptor = StackDescriptor {
    service: "nodejs",
    image: "node:18",
    mount_target: "/app",
    working_dir: Some("/app"),
    command: Some("sh -c \"npm install && npm run dev\""),
    port: 3000,
    environment: &["NODE_ENV=development"],
    companion: None,
    scaffold: Some(Scaffold::ExpressStarter),
};

static REACT: StackDescriptor = StackDescriptor {
    service: "react-vite",
    image: "node:18",
    mount_target: "/app",
    working_dir: Some("/app"),
    command: Some("sh -c \"npm install && npm run dev -- --host --port 3000\""),
    port: 3000,
    environment: &[],
    companion: None,
    scaffold: Some(Scaffold::ViteReact),
};

static NEXT: StackDescriptor = StackDescriptor {
    service: "nextjs",
    image: "node:18",
    mount_target: "/app",
    working_dir: Some("/app"),
    command: Some("sh -c \"npm install && npm run dev -- --hostname 0.0.0.0\""),
    port: 3000,
    environment: &[
        "NODE_ENV=development",
        "NEXT_TELEMETRY_DISABLED=1",
        "HOSTNAME=0.0.0.0",
        "PORT=3000",
    ],
    companion: None,
    scaffold: Some(Scaffold::NextStarter),
};
