//! Suppression of service start/stop inside a root filesystem.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::Error;
use crate::in_root;
use crate::Result;

/// Keeps the service manager from activating daemons inside a root while
/// commands run there.
pub trait ServiceGate: Send + Sync {
    /// Stop services from being started inside `root`.
    fn deny(&self, root: &Path) -> Result<()>;

    /// Lift the restriction installed by [`ServiceGate::deny`].
    fn allow(&self, root: &Path) -> Result<()>;
}

/// Gate for roots without a service manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoServiceGate;

impl ServiceGate for NoServiceGate {
    fn deny(&self, _root: &Path) -> Result<()> {
        Ok(())
    }

    fn allow(&self, _root: &Path) -> Result<()> {
        Ok(())
    }
}

/// Gate based on the Debian `policy-rc.d` convention: while
/// `/usr/sbin/policy-rc.d` exits with 101, `invoke-rc.d` refuses every action.
///
/// Only policy files this gate wrote are ever removed; a policy the root
/// already ships is left alone even when its content is identical.
#[derive(Debug, Default)]
pub struct PolicyRcGate {
    installed: Mutex<HashSet<PathBuf>>,
}

impl PolicyRcGate {
    pub const POLICY_PATH: &'static str = "/usr/sbin/policy-rc.d";
    pub const POLICY_SCRIPT: &'static str = "#!/bin/sh\nexit 101\n";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy_file(root: &Path) -> PathBuf {
        in_root(root, Self::POLICY_PATH)
    }

    fn installed(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.installed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ServiceGate for PolicyRcGate {
    fn deny(&self, root: &Path) -> Result<()> {
        let policy = Self::policy_file(root);

        // Never clobber a policy the root ships itself
        if fs::symlink_metadata(&policy).is_ok() {
            return Err(Error::ServicePolicy(format!(
                "Policy file {} already exists",
                policy.display()
            )));
        }

        fs::write(&policy, Self::POLICY_SCRIPT).map_err(|e| {
            Error::ServicePolicy(format!("Failed to write {}: {}", policy.display(), e))
        })?;
        self.installed().insert(policy.clone());
        fs::set_permissions(&policy, fs::Permissions::from_mode(0o755))?;

        debug!("Service activation denied via {}", policy.display());
        Ok(())
    }

    fn allow(&self, root: &Path) -> Result<()> {
        let policy = Self::policy_file(root);
        if !self.installed().remove(&policy) {
            debug!("No policy installed in {}, nothing to lift", root.display());
            return Ok(());
        }

        match fs::read(&policy) {
            Ok(content) if content == Self::POLICY_SCRIPT.as_bytes() => {
                fs::remove_file(&policy).map_err(|e| {
                    Error::ServicePolicy(format!("Failed to remove {}: {}", policy.display(), e))
                })?;
                debug!("Service activation allowed again in {}", root.display());
                Ok(())
            }
            Ok(_) => Err(Error::ServicePolicy(format!(
                "Policy file {} was replaced during the run, leaving it in place",
                policy.display()
            ))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
