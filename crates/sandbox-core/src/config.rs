//! External tool locations and on-disk run descriptions.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::command::Command;
use crate::emulation::INTERPRETER_DIR;
use crate::error::Error;
use crate::Result;

/// Where the runner finds the tools and files it relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Launcher for classic chroot; the root path and command are appended
    pub chroot_launcher: Vec<String>,
    /// Launcher for namespace containers; flags, root and command are appended
    pub container_launcher: Vec<String>,
    /// Host DNS configuration overlaid into the root
    pub host_resolv_conf: PathBuf,
    /// Host directory containing the `qemu-*-static` interpreters
    pub interpreter_dir: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            chroot_launcher: vec!["chroot".to_string()],
            container_launcher: vec!["systemd-nspawn".to_string()],
            host_resolv_conf: PathBuf::from(sandbox_fs::resolv::RESOLV_CONF),
            interpreter_dir: PathBuf::from(INTERPRETER_DIR),
        }
    }
}

/// A complete run read from a JSON file.
///
/// ```json
/// {
///   "label": "install packages",
///   "command": {
///     "architecture": "armhf",
///     "chroot": "/build/root",
///     "method": "namespace-container",
///     "bind_mounts": ["/pkg/app.deb"],
///     "extra_env": ["DEBIAN_FRONTEND=noninteractive"]
///   },
///   "argv": ["dpkg", "-i", "/pkg/app.deb"]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunFile {
    pub label: Option<String>,
    pub command: Command,
    pub argv: Vec<String>,
    pub tools: ToolConfig,
}

impl RunFile {
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading run file {}", path.display());
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}
