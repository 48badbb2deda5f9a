//! Commands derived from the state of an ongoing image build.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

use crate::command::{Command, IsolationMode};

/// The parts of a build's state that decide how its commands run.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    /// Architecture of the root filesystem being built
    pub architecture: String,
    /// Root filesystem directory
    pub rootdir: PathBuf,
    /// Environment every command in the build receives
    pub environ_vars: BTreeMap<String, String>,
    /// Disk image the root is being written to, if any
    pub image: Option<PathBuf>,
    /// Partition devices of `image`
    pub image_partitions: Vec<PathBuf>,
}

impl Command {
    /// A namespace-container command for `context`.
    ///
    /// When the build targets a disk image, the image, its partition devices
    /// and `/dev/disk` are bind-mounted so tools inside the root can reach
    /// them. Paths that cannot be resolved are logged and skipped.
    pub fn for_context(context: &BuildContext) -> Self {
        let mut cmd = Command::in_root(&context.rootdir, IsolationMode::NamespaceContainer)
            .with_architecture(context.architecture.clone());

        for (key, value) in &context.environ_vars {
            cmd.add_env_key(key, value);
        }

        if let Some(image) = &context.image {
            match std::fs::canonicalize(image) {
                Ok(path) => cmd.add_bind_mount(path, None),
                Err(e) => warn!("Failed to get realpath for {}: {}", image.display(), e),
            }
            for partition in &context.image_partitions {
                match std::fs::canonicalize(partition) {
                    Ok(path) => cmd.add_bind_mount(path, None),
                    Err(e) => warn!("Failed to get realpath for {}: {}", partition.display(), e),
                }
            }
            cmd.add_bind_mount("/dev/disk", None);
        }

        cmd
    }
}
