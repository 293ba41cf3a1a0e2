//! On-disk layout for one (owner, project) pair
//!
//! ```text
//! <base>/<owner>/<project>/
//!   data/                 project content, mounted into the primary service
//!   filebrowser_data/     sidecar database
//!   docker-compose.yml    generated manifest
//! ```

use crate::error::DeployError;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DATA_DIR: &str = "data";
pub const SIDECAR_DIR: &str = "filebrowser_data";
pub const MANIFEST_FILE: &str = "docker-compose.yml";
pub const SIDECAR_DATABASE: &str = "filebrowser.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Workspace location for a pair, without touching the filesystem
    pub fn locate(base: &Path, owner: &str, project: &str) -> Self {
        Self {
            root: base.join(owner).join(project),
        }
    }

    /// Create `data/` and `filebrowser_data/` (and any parents).
    ///
    /// Existing directories and their content are left alone, so calling this
    /// again for the same pair is a no-op.
    pub async fn allocate(base: &Path, owner: &str, project: &str) -> Result<Self, DeployError> {
        let workspace = Self::locate(base, owner, project);

        for dir in [workspace.data_dir(), workspace.sidecar_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| DeployError::Storage { path: dir.clone(), source })?;
        }

        debug!(root = %workspace.root.display(), "Workspace ready");
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn sidecar_dir(&self) -> PathBuf {
        self.root.join(SIDECAR_DIR)
    }

    pub fn sidecar_database(&self) -> PathBuf {
        self.sidecar_dir().join(SIDECAR_DATABASE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }
}
