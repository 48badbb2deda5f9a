//! File installation with an explicit permission mode.

use std::fs::{self, File, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Error;
use crate::Result;

/// Copy `source` to `destination` and give the result `mode` permissions.
///
/// The data is written to a temporary file next to `destination` and renamed
/// into place, so a reader never observes a partially written file.
pub fn copy_file(source: &Path, destination: &Path, mode: u32) -> Result<()> {
    debug!(
        "Copying {} to {} (mode {:o})",
        source.display(),
        destination.display(),
        mode
    );

    install(source, destination, mode).map_err(|e| Error::Copy {
        source_path: source.to_path_buf(),
        destination: destination.to_path_buf(),
        source: e,
    })
}

fn install(source: &Path, destination: &Path, mode: u32) -> io::Result<()> {
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut input = File::open(source)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    io::copy(&mut input, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), Permissions::from_mode(mode))?;
    tmp.persist(destination).map_err(|e| e.error)?;
    Ok(())
}
