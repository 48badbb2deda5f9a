//! Temporary DNS configuration overlay for a target root.
//!
//! Before a command runs inside the root, the root's own `/etc/resolv.conf` is
//! moved aside to a side-car file and replaced with the host's configuration
//! (prefixed by a marker line). Afterwards the original is put back, but only if
//! the overlay is still byte-identical to what was written: a command that
//! deliberately rewrote or relinked the file keeps its version.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::in_root;
use crate::Result;

/// Location of the DNS configuration, on the host and inside the root.
pub const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Suffix of the side-car file holding the root's original configuration.
pub const SIDECAR_SUFFIX: &str = ".debos";

/// First line of every overlay written into a root.
pub const GENERATED_MARKER: &str = "# Automatically generated by Debos\n";

/// SHA-256 digest of a file's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Digest `data`.
    pub fn of(data: &[u8]) -> Self {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(data));
        Self(digest)
    }

    /// Digest the content of the file at `path`.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        Ok(Self::of(&fs::read(path)?))
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Saves and restores `/etc/resolv.conf` inside a root filesystem.
#[derive(Debug, Clone)]
pub struct ResolvConfGuard {
    root: Option<PathBuf>,
    host_conf: PathBuf,
}

impl ResolvConfGuard {
    /// Guard the DNS configuration of `root`, overlaying the host's
    /// `/etc/resolv.conf`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            host_conf: PathBuf::from(RESOLV_CONF),
        }
    }

    /// A guard that never touches anything; used when no root is entered.
    pub fn disabled() -> Self {
        Self {
            root: None,
            host_conf: PathBuf::from(RESOLV_CONF),
        }
    }

    /// Read the overlay content from `path` instead of the host's
    /// `/etc/resolv.conf`.
    pub fn with_host_conf(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_conf = path.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    /// Path of the DNS configuration inside the root.
    pub fn chrooted_conf(&self) -> Option<PathBuf> {
        self.root.as_deref().map(|root| in_root(root, RESOLV_CONF))
    }

    /// Path of the side-car file inside the root.
    pub fn saved_conf(&self) -> Option<PathBuf> {
        self.chrooted_conf().map(|conf| {
            let mut name = conf.into_os_string();
            name.push(SIDECAR_SUFFIX);
            PathBuf::from(name)
        })
    }

    /// Move the root's configuration aside and write the host overlay.
    ///
    /// Returns the checksum of the overlay, or `None` when the guard is
    /// disabled.
    pub fn save(&self) -> Result<Option<Checksum>> {
        let (Some(chrooted), Some(saved)) = (self.chrooted_conf(), self.saved_conf()) else {
            return Ok(None);
        };

        // The root may not have a resolv.conf at all
        if fs::symlink_metadata(&chrooted).is_ok() {
            fs::rename(&chrooted, &saved).map_err(|e| {
                Error::ResolvConf(format!(
                    "Failed to move {} aside to {}: {}",
                    chrooted.display(),
                    saved.display(),
                    e
                ))
            })?;
            debug!("Saved {} as {}", chrooted.display(), saved.display());
        }

        let host = fs::read(&self.host_conf).map_err(|e| {
            Error::ResolvConf(format!(
                "Failed to read host DNS configuration {}: {}",
                self.host_conf.display(),
                e
            ))
        })?;

        let mut overlay = GENERATED_MARKER.as_bytes().to_vec();
        overlay.extend_from_slice(&host);
        let sum = Checksum::of(&overlay);

        fs::write(&chrooted, &overlay).map_err(|e| {
            Error::ResolvConf(format!("Failed to write {}: {}", chrooted.display(), e))
        })?;
        set_mode(&chrooted, 0o644)?;

        info!("Installed host DNS configuration into {}", chrooted.display());
        Ok(Some(sum))
    }

    /// Put the root's original configuration back if the overlay identified
    /// by `sum` is still in place.
    ///
    /// The side-car file is removed on every path out of this function.
    pub fn restore(&self, sum: Option<&Checksum>) -> Result<()> {
        let (Some(chrooted), Some(saved), Some(sum)) =
            (self.chrooted_conf(), self.saved_conf(), sum)
        else {
            return Ok(());
        };

        let result = restore_original(&chrooted, &saved, sum);

        match fs::remove_file(&saved) {
            Ok(()) => debug!("Removed {}", saved.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", saved.display(), e),
        }

        result
    }
}

fn restore_original(chrooted: &Path, saved: &Path, sum: &Checksum) -> Result<()> {
    let metadata = match fs::symlink_metadata(chrooted) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(
                "{} was removed by the command, leaving it absent",
                chrooted.display()
            );
            return Ok(());
        }
        Err(e) => {
            warn!("Failed to inspect {}: {}", chrooted.display(), e);
            return Ok(());
        }
    };

    let file_type = metadata.file_type();
    if file_type.is_file() {
        let current = Checksum::of_file(chrooted).map_err(|e| {
            Error::ResolvConf(format!("Failed to read {}: {}", chrooted.display(), e))
        })?;

        if current != *sum {
            info!(
                "{} was rewritten by the command, keeping its version",
                chrooted.display()
            );
            return Ok(());
        }

        fs::remove_file(chrooted).map_err(|e| {
            Error::ResolvConf(format!("Failed to remove {}: {}", chrooted.display(), e))
        })?;

        if fs::symlink_metadata(saved).is_ok() {
            fs::rename(saved, chrooted).map_err(|e| {
                Error::ResolvConf(format!(
                    "Failed to restore {} from {}: {}",
                    chrooted.display(),
                    saved.display(),
                    e
                ))
            })?;
            debug!("Restored original {}", chrooted.display());
        }
    } else if file_type.is_symlink() {
        debug!(
            "{} was replaced by a symlink, leaving it untouched",
            chrooted.display()
        );
    } else {
        warn!(
            "{} inside the chroot is not a regular file",
            chrooted.display()
        );
    }

    Ok(())
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        Error::ResolvConf(format!(
            "Failed to set permissions on {}: {}",
            path.display(),
            e
        ))
    })
}
