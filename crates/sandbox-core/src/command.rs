//! Command configuration and argument-vector assembly for each isolation mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

use crate::config::ToolConfig;
use crate::emulation::Architecture;
use crate::error::Error;
use crate::Result;

/// How a command enters the target root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    /// Run directly on the host
    #[default]
    None,
    /// Plain `chroot(8)` into the root
    #[serde(alias = "chroot")]
    ClassicChroot,
    /// Ephemeral `systemd-nspawn` container on the root
    #[serde(alias = "nspawn")]
    NamespaceContainer,
}

impl IsolationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ClassicChroot => "classic-chroot",
            Self::NamespaceContainer => "namespace-container",
        }
    }

    /// Whether the mode enters a root and therefore needs a chroot path.
    pub fn uses_root(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "classic-chroot" | "chroot" => Ok(Self::ClassicChroot),
            "namespace-container" | "nspawn" => Ok(Self::NamespaceContainer),
            other => Err(Error::Config(format!(
                "Unknown isolation mode '{}' (expected none, classic-chroot or namespace-container)",
                other
            ))),
        }
    }
}

/// Description of where and how one build step's command runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Command {
    /// Architecture of the root; empty means the host architecture
    pub architecture: String,
    /// Working directory for the command
    pub dir: Option<PathBuf>,
    /// Root filesystem to run in
    pub chroot: Option<PathBuf>,
    /// How to enter the root
    pub method: IsolationMode,

    bind_mounts: Vec<String>,
    extra_env: Vec<String>,
}

impl Command {
    /// A command that runs on the host.
    pub fn new() -> Self {
        Self::default()
    }

    /// A command that runs inside `root` using `method`.
    pub fn in_root(root: impl Into<PathBuf>, method: IsolationMode) -> Self {
        Self {
            chroot: Some(root.into()),
            method,
            ..Self::default()
        }
    }

    pub fn with_architecture(mut self, architecture: impl Into<String>) -> Self {
        self.architecture = architecture.into();
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Append a raw `KEY=VALUE` assignment.
    pub fn add_env(&mut self, assignment: impl Into<String>) {
        self.extra_env.push(assignment.into());
    }

    /// Append `key=value`.
    pub fn add_env_key(&mut self, key: &str, value: &str) {
        self.extra_env.push(format!("{}={}", key, value));
    }

    /// Append a bind mount of `source` onto `target` inside the root, or onto
    /// the same path when `target` is `None`.
    pub fn add_bind_mount(&mut self, source: impl AsRef<Path>, target: Option<&Path>) {
        let source = source.as_ref().display();
        let mount = match target {
            Some(target) => format!("{}:{}", source, target.display()),
            None => source.to_string(),
        };
        self.bind_mounts.push(mount);
    }

    pub fn bind_mounts(&self) -> &[String] {
        &self.bind_mounts
    }

    pub fn extra_env(&self) -> &[String] {
        &self.extra_env
    }

    /// The root path, if one is set and non-empty.
    pub fn chroot_path(&self) -> Option<&Path> {
        self.chroot
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// The working directory, if one is set and non-empty.
    pub fn working_dir(&self) -> Option<&Path> {
        self.dir.as_deref().filter(|d| !d.as_os_str().is_empty())
    }

    /// The target architecture, or `None` for the host architecture.
    pub fn target_architecture(&self) -> Result<Option<Architecture>> {
        match self.architecture.trim() {
            "" => Ok(None),
            name => name.parse().map(Some),
        }
    }

    /// Check the configuration before anything is touched on disk.
    pub fn validate(&self) -> Result<Option<Architecture>> {
        if self.method.uses_root() && self.chroot_path().is_none() {
            return Err(Error::MissingChroot(self.method));
        }
        self.target_architecture()
    }

    /// Extra environment as `(key, value)` pairs; malformed entries are skipped.
    pub fn env_pairs(&self) -> Vec<(&str, &str)> {
        self.extra_env
            .iter()
            .filter_map(|assignment| {
                let pair = assignment.split_once('=');
                if pair.is_none() {
                    warn!("Ignoring malformed environment assignment '{}'", assignment);
                }
                pair
            })
            .collect()
    }

    /// Build the full argument vector that runs `cmdline` in this
    /// configuration's isolation mode.
    pub fn argv<S: AsRef<str>>(&self, tools: &ToolConfig, cmdline: &[S]) -> Result<Vec<String>> {
        if cmdline.is_empty() {
            return Err(Error::EmptyCommand);
        }
        let cmdline = cmdline.iter().map(|s| s.as_ref().to_string());

        let root = || {
            self.chroot_path()
                .map(|p| p.to_string_lossy().into_owned())
                .ok_or(Error::MissingChroot(self.method))
        };

        let mut options = Vec::new();
        match self.method {
            IsolationMode::None => options.extend(cmdline),
            IsolationMode::ClassicChroot => {
                if !self.bind_mounts.is_empty() {
                    warn!(
                        "Bind mounts are not supported with classic chroot, ignoring {:?}",
                        self.bind_mounts
                    );
                }
                if let Some(dir) = self.working_dir() {
                    warn!(
                        "Working directory is not supported with classic chroot, ignoring {}",
                        dir.display()
                    );
                }
                options.extend(launcher(&tools.chroot_launcher, "chroot")?);
                options.push(root()?);
                options.extend(cmdline);
            }
            IsolationMode::NamespaceContainer => {
                options.extend(launcher(&tools.container_launcher, "container")?);
                // DNS, timezone and unit handling belong to the runner
                options.extend(
                    [
                        "-q",
                        "--resolv-conf=off",
                        "--timezone=off",
                        "--register=no",
                        "--keep-unit",
                        "--console=pipe",
                    ]
                    .map(String::from),
                );
                for env in &self.extra_env {
                    options.push("--setenv".to_string());
                    options.push(env.clone());
                }
                for mount in &self.bind_mounts {
                    options.push("--bind".to_string());
                    options.push(mount.clone());
                }
                if let Some(dir) = self.working_dir() {
                    options.push(format!("--chdir={}", dir.display()));
                }
                options.push("-D".to_string());
                options.push(root()?);
                options.extend(cmdline);
            }
        }

        Ok(options)
    }
}

fn launcher(argv: &[String], what: &str) -> Result<Vec<String>> {
    if argv.is_empty() {
        return Err(Error::Config(format!("No {} launcher configured", what)));
    }
    Ok(argv.to_vec())
}
