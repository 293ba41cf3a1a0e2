//! docker-compose.yml generation
//!
//! Output is plain text assembled in a fixed order, so the same stack and
//! project always produce byte-identical manifests.

use crate::config::{Config, RoutingConfig};
use crate::error::DeployError;
use crate::stack::StackDescriptor;
use crate::workspace::{Workspace, DATA_DIR, SIDECAR_DATABASE, SIDECAR_DIR};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

/// Service name of the file-management sidecar in every manifest
pub const SIDECAR_SERVICE: &str = "filebrowser";

/// Port the sidecar listens on inside its container
const SIDECAR_PORT: u16 = 80;

/// Everything besides the stack descriptor that ends up in the manifest
#[derive(Debug, Clone, Copy)]
pub struct ManifestContext<'a> {
    pub project: &'a str,
    pub routing: &'a RoutingConfig,
    pub network: &'a str,
    pub sidecar_image: &'a str,
}

impl<'a> ManifestContext<'a> {
    pub fn from_config(config: &'a Config, project: &'a str) -> Self {
        Self {
            project,
            routing: &config.routing,
            network: &config.network.name,
            sidecar_image: &config.sidecar.service_image,
        }
    }
}

/// Render the full manifest for one project
pub fn render(stack: &StackDescriptor, ctx: &ManifestContext<'_>) -> String {
    let data_volume = format!("./{}:{}", DATA_DIR, stack.mount_target);
    let mut out = String::from("services:\n");

    // Primary service
    out.push_str(&format!("  {}:\n", stack.service));
    out.push_str(&format!("    image: {}\n", stack.image));
    out.push_str(&networks(ctx.network));
    if let Some(dir) = stack.working_dir {
        out.push_str(&format!("    working_dir: {}\n", dir));
    }
    out.push_str(&format!("    volumes:\n      - {}\n", quote(&data_volume)));
    if let Some(command) = stack.command {
        out.push_str(&format!("    command: {}\n", quote(command)));
    }
    out.push_str(&labels(&ctx.routing.hostname(ctx.project), stack.port));
    out.push_str("    restart: always\n");
    if !stack.environment.is_empty() {
        out.push_str("    environment:\n");
        for var in stack.environment {
            out.push_str(&format!("      - {}\n", var));
        }
    }

    // One-shot companion, not routed
    if let Some(companion) = &stack.companion {
        out.push('\n');
        out.push_str(&format!("  {}:\n", companion.name));
        out.push_str(&format!("    image: {}\n", companion.image));
        out.push_str(&format!("    working_dir: {}\n", stack.mount_target));
        out.push_str(&format!("    volumes:\n      - {}\n", quote(&data_volume)));
        out.push_str(&format!("    command: {}\n", quote(companion.command)));
        out.push_str(&format!("    depends_on:\n      - {}\n", stack.service));
    }

    // File-management sidecar
    out.push('\n');
    out.push_str(&format!("  {}:\n", SIDECAR_SERVICE));
    out.push_str(&format!("    image: {}\n", ctx.sidecar_image));
    out.push_str(&networks(ctx.network));
    out.push_str(&labels(&ctx.routing.sidecar_hostname(ctx.project), SIDECAR_PORT));
    out.push_str("    volumes:\n");
    out.push_str(&format!(
        "      - {}\n",
        quote(&format!("./{}/{}:/database.db", SIDECAR_DIR, SIDECAR_DATABASE))
    ));
    out.push_str(&format!("      - {}\n", quote(&format!("./{}:/srv", DATA_DIR))));
    out.push_str(&format!("    command: {}\n", quote("--database /database.db")));
    out.push_str("    restart: always\n");

    out.push_str(&format!(
        "\nnetworks:\n  {}:\n    external: true\n",
        ctx.network
    ));
    out
}

/// Write `text` to the workspace's manifest, replacing any previous one.
///
/// The text goes to a temporary file next to the manifest first and is renamed
/// into place, so readers never see a half-written file.
pub fn write(workspace: &Workspace, text: &str) -> Result<PathBuf, DeployError> {
    let path = workspace.manifest_path();
    let manifest_err = |source: std::io::Error| DeployError::Manifest {
        path: path.clone(),
        source,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".docker-compose")
        .suffix(".yml.tmp")
        .tempfile_in(workspace.root())
        .map_err(manifest_err)?;
    tmp.write_all(text.as_bytes()).map_err(manifest_err)?;
    tmp.flush().map_err(manifest_err)?;
    debug!(tmp = %tmp.path().display(), "Manifest staged");

    tmp.persist(&path).map_err(|e| manifest_err(e.error))?;

    info!(path = %path.display(), bytes = text.len(), "Manifest written");
    Ok(path)
}

fn networks(network: &str) -> String {
    format!("    networks:\n      - {}\n", network)
}

fn labels(host: &str, port: u16) -> String {
    format!(
        "    labels:\n      caddy: {}\n      caddy.reverse_proxy: {}\n",
        quote(host),
        quote(&format!("{{{{upstreams {}}}}}", port))
    )
}

/// YAML double-quoted scalar
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackType;

    fn render_default(stack: StackType, project: &str) -> String {
        let config = Config::default();
        render(stack.descriptor(), &ManifestContext::from_config(&config, project))
    }

    #[test]
    fn test_render_node() {
        let expected = r#"services:
  nodejs:
    image: node:18
    networks:
      - caddy_net
    working_dir: /app
    volumes:
      - "./data:/app"
    command: "sh -c \"npm install && npm run dev\""
    labels:
      caddy: "blog.quiere.cafe"
      caddy.reverse_proxy: "{{upstreams 3000}}"
    restart: always
    environment:
      - NODE_ENV=development

  filebrowser:
    image: filebrowser/filebrowser:latest
    networks:
      - caddy_net
    labels:
      caddy: "fb-blog.quiere.cafe"
      caddy.reverse_proxy: "{{upstreams 80}}"
    volumes:
      - "./filebrowser_data/filebrowser.db:/database.db"
      - "./data:/srv"
    command: "--database /database.db"
    restart: always

networks:
  caddy_net:
    external: true
"#;
        assert_eq!(render_default(StackType::Node, "blog"), expected);
    }

    #[test]
    fn test_render_laravel_companion() {
        let text = render_default(StackType::Laravel, "shop");

        assert!(text.contains(
            "  composer:\n    image: composer:latest\n    working_dir: /var/www\n    volumes:\n      - \"./data:/var/www\"\n    command: \"composer install\"\n    depends_on:\n      - laravel\n"
        ));
        assert!(text.contains("caddy.reverse_proxy: \"{{upstreams 8000}}\""));

        let laravel = text.find("  laravel:").unwrap();
        let composer = text.find("  composer:").unwrap();
        let sidecar = text.find("  filebrowser:").unwrap();
        assert!(laravel < composer && composer < sidecar);
    }

    #[test]
    fn test_render_static_has_no_command() {
        let text = render_default(StackType::Static, "site");
        let primary = &text[..text.find("  filebrowser:").unwrap()];

        assert!(primary.contains("image: httpd:latest"));
        assert!(primary.contains("\"./data:/usr/local/apache2/htdocs/\""));
        assert!(!primary.contains("command:"));
        assert!(!primary.contains("working_dir:"));
        assert!(!primary.contains("environment:"));
    }

    #[test]
    fn test_render_uses_configured_routing() {
        let mut config = Config::default();
        config.routing.domain = "example.org".to_string();
        config.network.name = "proxy".to_string();

        let text = render(
            StackType::Php.descriptor(),
            &ManifestContext::from_config(&config, "app"),
        );

        assert!(text.contains("caddy: \"app.example.org\""));
        assert!(text.contains("caddy: \"fb-app.example.org\""));
        assert!(text.ends_with("networks:\n  proxy:\n    external: true\n"));
        assert!(!text.contains("caddy_net"));
    }

    #[test]
    fn test_render_is_deterministic() {
        for stack in StackType::ALL {
            assert_eq!(render_default(stack, "blog"), render_default(stack, "blog"));
        }
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote(r#"sh -c "x""#), r#""sh -c \"x\"""#);
        assert_eq!(quote(r"a\b"), r#""a\\b""#);
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let base = tempfile::TempDir::new().unwrap();
        let workspace = Workspace::allocate(base.path(), "u1", "blog").await.unwrap();

        write(&workspace, "old: true\n").unwrap();
        let path = write(&workspace, "new: true\n").unwrap();

        assert_eq!(path, workspace.manifest_path());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new: true\n");
        // no staging files left behind
        let leftovers: Vec<_> = std::fs::read_dir(workspace.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_into_missing_workspace_fails() {
        let base = tempfile::TempDir::new().unwrap();
        let workspace = Workspace::locate(base.path(), "u1", "missing");

        let err = write(&workspace, "x").unwrap_err();
        assert!(matches!(err, DeployError::Manifest { .. }));
    }
}
