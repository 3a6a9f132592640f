//! Error types for the sync daemon

use std::path::Path;

use thiserror::Error;

/// Missing tool or missing path on the host
pub const EXIT_ENV: i32 = 1;
/// A git operation failed
pub const EXIT_GIT: i32 = 2;
/// Remote config content is not valid JSON
pub const EXIT_JSON: i32 = 3;
/// Hashing, copying or deleting a file failed
pub const EXIT_COPY: i32 = 4;
/// The configuration document is malformed or invalid
pub const EXIT_CONFIG: i32 = 5;

/// Main error type for the sync daemon
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("missing paths: {0}")]
    MissingPaths(String),

    #[error("Environment error: {0}")]
    EnvError(String),

    #[error("git {op} failed: {message}")]
    GitError { op: String, message: String },

    #[error("invalid JSON in {path} ({message})")]
    InvalidJson { path: String, message: String },

    #[error("Copy error: {0}")]
    CopyError(String),

    #[error("Configuration error: {}", .0.join("; "))]
    ConfigError(Vec<String>),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DaemonError {
    /// Build a git failure for `op` (e.g. "fetch", "rev-parse origin/main")
    pub fn git(op: impl Into<String>, message: impl Into<String>) -> Self {
        DaemonError::GitError {
            op: op.into(),
            message: message.into(),
        }
    }

    /// Build a copy failure that names the offending path
    pub fn copy(path: &Path, err: impl std::fmt::Display) -> Self {
        DaemonError::CopyError(format!("{}: {}", path.display(), err))
    }

    /// Stable numeric code for this failure class
    pub fn code(&self) -> i32 {
        match self {
            DaemonError::MissingPaths(_) | DaemonError::EnvError(_) => EXIT_ENV,
            DaemonError::GitError { .. } => EXIT_GIT,
            DaemonError::InvalidJson { .. } => EXIT_JSON,
            DaemonError::CopyError(_) | DaemonError::IoError(_) => EXIT_COPY,
            DaemonError::ConfigError(_) | DaemonError::JsonError(_) => EXIT_CONFIG,
            DaemonError::ServerError(_)
            | DaemonError::ShutdownError(_)
            | DaemonError::Internal(_) => EXIT_ENV,
        }
    }
}

impl From<anyhow::Error> for DaemonError {
    fn from(err: anyhow::Error) -> Self {
        DaemonError::Internal(err.to_string())
    }
}
