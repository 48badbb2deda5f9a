//! Error types for filesystem operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in filesystem operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to copy {} to {}: {source}", source_path.display(), destination.display())]
    Copy {
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("resolv.conf handling failed: {0}")]
    ResolvConf(String),

    #[error("Service policy error: {0}")]
    ServicePolicy(String),
}
