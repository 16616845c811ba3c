//! Error types for the deployer

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for deployer operations
pub type DeployResult<T> = std::result::Result<T, DeployError>;

/// Failures raised while loading configuration, talking to the remote host,
/// or running the patch tool.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Missing config file, missing key, missing local directory
    #[error("{0}")]
    Config(String),

    /// No configured credential was accepted by the server
    #[error("Authentication failed for {user}@{host}: {reason}")]
    Authentication {
        user: String,
        host: String,
        reason: String,
    },

    /// TCP connect or SSH handshake failure
    #[error("SSH connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    /// Remote mkdir/upload failure, or a local entry that cannot be mirrored
    #[error("Transfer failed for {path}: {reason}")]
    Transfer { path: String, reason: String },

    /// The patch tool ran and exited non-zero
    #[error("Patcher exited with status {code}")]
    PatcherFailed { code: i32 },

    /// The patch tool could not be started at all
    #[error("Failed to start patcher in {dir}: {source}")]
    PatcherSpawn {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn transfer(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transfer {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Process exit code for this failure. The patch tool's own status is
    /// passed through verbatim.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PatcherFailed { code } => *code,
            _ => 1,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
