//! Filesystem controls around chrooted execution: DNS overlay, file
//! installation into the target root, and service start suppression.

#![cfg(target_os = "linux")]

use std::path::{Component, Path, PathBuf};

pub mod copy;
pub mod error;
pub mod resolv;
pub mod services;

pub type Result<T> = std::result::Result<T, error::Error>;

pub use copy::copy_file;
pub use resolv::{Checksum, ResolvConfGuard};
pub use services::{NoServiceGate, PolicyRcGate, ServiceGate};

/// Resolve an absolute in-root path (e.g. `/etc/resolv.conf`) against a root
/// directory on the host.
///
/// Unlike [`Path::join`], an absolute `path` does not replace `root`.
pub fn in_root(root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let mut resolved = root.to_path_buf();
    for component in path.as_ref().components() {
        match component {
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            other => resolved.push(other),
        }
    }
    resolved
}
