//! Deploy error taxonomy and JSON error bodies

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Error codes for failed deploys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeployErrorCode {
    /// Owner or project name is not a safe path segment
    InvalidRequest,
    /// Stack type tag outside the supported set
    UnsupportedStackType,
    /// Workspace directories could not be created
    StorageError,
    /// Archive entry resolves outside the data directory
    PathTraversal,
    /// Archive could not be opened or extracted
    ArchiveError,
    /// Shared proxy network could not be provisioned
    NetworkError,
    /// Sidecar database or admin account setup failed
    ProvisioningError,
    /// Manifest could not be written
    ManifestError,
    /// Orchestration tool failed to bring the stack up
    ConvergenceError,
}

impl DeployErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployErrorCode::InvalidRequest => "INVALID_REQUEST",
            DeployErrorCode::UnsupportedStackType => "UNSUPPORTED_STACK_TYPE",
            DeployErrorCode::StorageError => "STORAGE_ERROR",
            DeployErrorCode::PathTraversal => "PATH_TRAVERSAL",
            DeployErrorCode::ArchiveError => "ARCHIVE_ERROR",
            DeployErrorCode::NetworkError => "NETWORK_ERROR",
            DeployErrorCode::ProvisioningError => "PROVISIONING_ERROR",
            DeployErrorCode::ManifestError => "MANIFEST_ERROR",
            DeployErrorCode::ConvergenceError => "CONVERGENCE_ERROR",
        }
    }

    /// Whether the failure happened before anything touched disk or the runtime
    pub fn is_side_effect_free(&self) -> bool {
        matches!(
            self,
            DeployErrorCode::InvalidRequest | DeployErrorCode::UnsupportedStackType
        )
    }
}

/// A deploy that stopped before the stack came up.
///
/// Everything except scaffold failures ends up here. Files written by earlier
/// steps are left in place.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid deploy request: {0}")]
    InvalidRequest(String),

    #[error("unsupported stack type '{0}'")]
    UnsupportedStackType(String),

    #[error("failed to create workspace directory {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive entry '{entry}' resolves outside {}", dest.display())]
    PathTraversal { entry: String, dest: PathBuf },

    #[error("failed to import archive {}: {reason}", path.display())]
    Archive { path: PathBuf, reason: String },

    #[error("shared network '{network}' unavailable: {reason}")]
    Network { network: String, reason: String },

    #[error("sidecar provisioning failed during {step}: {reason}")]
    Provisioning { step: &'static str, reason: String },

    #[error("failed to write manifest {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stack convergence failed in {}: {reason}", dir.display())]
    Convergence { dir: PathBuf, reason: String },
}

impl DeployError {
    pub fn code(&self) -> DeployErrorCode {
        match self {
            DeployError::InvalidRequest(_) => DeployErrorCode::InvalidRequest,
            DeployError::UnsupportedStackType(_) => DeployErrorCode::UnsupportedStackType,
            DeployError::Storage { .. } => DeployErrorCode::StorageError,
            DeployError::PathTraversal { .. } => DeployErrorCode::PathTraversal,
            DeployError::Archive { .. } => DeployErrorCode::ArchiveError,
            DeployError::Network { .. } => DeployErrorCode::NetworkError,
            DeployError::Provisioning { .. } => DeployErrorCode::ProvisioningError,
            DeployError::Manifest { .. } => DeployErrorCode::ManifestError,
            DeployError::Convergence { .. } => DeployErrorCode::ConvergenceError,
        }
    }
}

/// JSON error body printed by the CLI
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: DeployErrorCode,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: DeployErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}"}}"#,
                self.code.as_str(),
                self.message.replace('\\', "\\\\").replace('\"', "\\\"")
            )
        })
    }
}

impl From<&DeployError> for ErrorResponse {
    fn from(err: &DeployError) -> Self {
        ErrorResponse::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            DeployError::UnsupportedStackType("Django".into()).code(),
            DeployErrorCode::UnsupportedStackType
        );
        assert_eq!(
            DeployError::PathTraversal {
                entry: "../x".into(),
                dest: PathBuf::from("/srv/u1/blog/data"),
            }
            .code(),
            DeployErrorCode::PathTraversal
        );
        assert_eq!(
            DeployError::Convergence {
                dir: PathBuf::from("/srv"),
                reason: "exit 1".into(),
            }
            .code(),
            DeployErrorCode::ConvergenceError
        );
    }

    #[test]
    fn test_side_effect_free_codes() {
        assert!(DeployErrorCode::InvalidRequest.is_side_effect_free());
        assert!(DeployErrorCode::UnsupportedStackType.is_side_effect_free());
        assert!(!DeployErrorCode::StorageError.is_side_effect_free());
        assert!(!DeployErrorCode::ProvisioningError.is_side_effect_free());
    }

    #[test]
    fn test_error_response_json() {
        let err = DeployError::UnsupportedStackType("Django".into());
        let json = ErrorResponse::from(&err).to_json();

        assert!(json.contains("\"code\":\"UNSUPPORTED_STACK_TYPE\""));
        assert!(json.contains("unsupported stack type 'Django'"));
    }

    #[test]
    fn test_code_serialization_matches_as_str() {
        for code in [
            DeployErrorCode::InvalidRequest,
            DeployErrorCode::StorageError,
            DeployErrorCode::PathTraversal,
            DeployErrorCode::ConvergenceError,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}
