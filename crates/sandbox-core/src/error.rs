//! Error types for the sandbox core module.

use std::process::ExitStatus;
use thiserror::Error;

use crate::command::IsolationMode;

/// Errors that can occur in sandbox operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Don't know which emulator to use for architecture '{0}'")]
    UnsupportedArchitecture(String),

    #[error("Isolation mode '{0}' requires a chroot path")]
    MissingChroot(IsolationMode),

    #[error("No command specified")]
    EmptyCommand,

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed: {status}")]
    Exited { program: String, status: ExitStatus },

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] sandbox_fs::error::Error),
}

impl Error {
    /// Exit code of the failed command, when it ran and exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited { status, .. } => status.code(),
            _ => None,
        }
    }
}
