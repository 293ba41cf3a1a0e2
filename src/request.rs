//! Deploy requests as handed over by the web API

use crate::error::DeployError;
use crate::stack::StackType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Longest accepted owner id
const MAX_OWNER_LEN: usize = 128;
/// DNS label limit; the project name becomes `<project>.<domain>`
const MAX_PROJECT_LEN: usize = 63;

/// Request in the shape the API layer produces. The stack type is still an
/// unparsed tag here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDeployRequest {
    #[serde(alias = "Webtype", alias = "webtype")]
    pub stack_type: String,
    #[serde(alias = "userid")]
    pub owner_id: String,
    #[serde(alias = "Webname")]
    pub project_name: String,
    #[serde(default, alias = "zip_path")]
    pub archive_path: Option<PathBuf>,
    #[serde(default)]
    pub admin_password: Option<String>,
}

/// A request whose stack type is known and whose names are safe to use as
/// path segments and hostname labels.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub stack_type: StackType,
    pub owner_id: String,
    pub project_name: String,
    /// Uploaded archive; consumed (deleted) after a successful import
    pub archive_path: Option<PathBuf>,
    /// Falls back to the configured sidecar password when absent
    pub admin_password: Option<String>,
}

impl DeployRequest {
    pub fn new(
        stack_type: StackType,
        owner_id: impl Into<String>,
        project_name: impl Into<String>,
    ) -> Result<Self, DeployError> {
        let request = Self {
            stack_type,
            owner_id: owner_id.into(),
            project_name: project_name.into(),
            archive_path: None,
            admin_password: None,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn with_archive(mut self, path: impl Into<PathBuf>) -> Self {
        self.archive_path = Some(path.into());
        self
    }

    pub fn with_admin_password(mut self, password: impl Into<String>) -> Result<Self, DeployError> {
        self.admin_password = Some(password.into());
        self.validate()?;
        Ok(self)
    }

    /// Key used to serialize deploys against the same workspace
    pub fn workspace_key(&self) -> String {
        format!("{}/{}", self.owner_id, self.project_name)
    }

    /// Compose project name, distinct for every workspace.
    ///
    /// Compose accepts `[a-z0-9_-]` starting with a letter or digit. Project
    /// names never contain `_`, so `<owner>_<project>` is unambiguous; owner
    /// ids that had to be rewritten get a suffix derived from the workspace key.
    pub fn compose_project(&self) -> String {
        let mut owner: String = self
            .owner_id
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '_' | '-' => c,
                'A'..='Z' => c.to_ascii_lowercase(),
                _ => '-',
            })
            .collect();
        if !owner.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            owner.insert(0, 'x');
        }

        let name = format!("{}_{}", owner, self.project_name);
        if owner == self.owner_id {
            return name;
        }
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, self.workspace_key().as_bytes());
        format!("{}-{}", name, &id.simple().to_string()[..8])
    }

    fn validate(&self) -> Result<(), DeployError> {
        validate_owner_id(&self.owner_id)?;
        validate_project_name(&self.project_name)?;
        if let Some(password) = &self.admin_password {
            if password.is_empty() {
                return Err(DeployError::InvalidRequest(
                    "admin password must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl TryFrom<RawDeployRequest> for DeployRequest {
    type Error = DeployError;

    fn try_from(raw: RawDeployRequest) -> Result<Self, Self::Error> {
        let stack_type: StackType = raw.stack_type.parse()?;
        let request = Self {
            stack_type,
            owner_id: raw.owner_id,
            project_name: raw.project_name,
            archive_path: raw.archive_path,
            admin_password: raw.admin_password,
        };
        request.validate()?;
        Ok(request)
    }
}

fn validate_owner_id(owner: &str) -> Result<(), DeployError> {
    if owner.is_empty() || owner.len() > MAX_OWNER_LEN {
        return Err(DeployError::InvalidRequest(format!(
            "owner id must be 1-{} characters",
            MAX_OWNER_LEN
        )));
    }
    if owner.starts_with('.') {
        return Err(DeployError::InvalidRequest(format!(
            "owner id '{}' must not start with '.'",
            owner
        )));
    }
    if let Some(c) = owner
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(DeployError::InvalidRequest(format!(
            "owner id '{}' contains invalid character {:?}",
            owner, c
        )));
    }
    Ok(())
}

/// Project names become hostname labels and path segments. Hostnames are
/// case-insensitive, so only lowercase names are accepted.
pub fn validate_project_name(project: &str) -> Result<(), DeployError> {
    if project.is_empty() || project.len() > MAX_PROJECT_LEN {
        return Err(DeployError::InvalidRequest(format!(
            "project name must be 1-{} characters",
            MAX_PROJECT_LEN
        )));
    }
    if project.starts_with('-') || project.ends_with('-') {
        return Err(DeployError::InvalidRequest(format!(
            "project name '{}' must not start or end with '-'",
            project
        )));
    }
    if project.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(DeployError::InvalidRequest(format!(
            "project name '{}' must be lowercase",
            project
        )));
    }
    if let Some(c) = project
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(DeployError::InvalidRequest(format!(
            "project name '{}' contains invalid character {:?}",
            project, c
        )));
    }
    Ok(())
}
