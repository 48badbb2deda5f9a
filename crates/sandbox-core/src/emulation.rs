//! Foreign-architecture support through static qemu user-mode interpreters.
//!
//! When the target root is built for an architecture the host cannot execute
//! natively, the matching `qemu-<arch>-static` binary is copied into the root
//! for the duration of a run so binfmt_misc can find it, and removed afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use sandbox_fs::{copy_file, in_root};

use crate::error::Error;
use crate::Result;

/// Directory holding the interpreters, on the host and inside the root.
pub const INTERPRETER_DIR: &str = "/usr/bin";

/// Target architectures a root filesystem can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Armhf,
    Armel,
    Arm,
    Arm64,
    Mips,
    Mipsel,
    Mips64el,
    Riscv64,
    I386,
    Amd64,
}

impl Architecture {
    pub const ALL: [Architecture; 10] = [
        Architecture::Armhf,
        Architecture::Armel,
        Architecture::Arm,
        Architecture::Arm64,
        Architecture::Mips,
        Architecture::Mipsel,
        Architecture::Mips64el,
        Architecture::Riscv64,
        Architecture::I386,
        Architecture::Amd64,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Armhf => "armhf",
            Self::Armel => "armel",
            Self::Arm => "arm",
            Self::Arm64 => "arm64",
            Self::Mips => "mips",
            Self::Mipsel => "mipsel",
            Self::Mips64el => "mips64el",
            Self::Riscv64 => "riscv64",
            Self::I386 => "i386",
            Self::Amd64 => "amd64",
        }
    }

    /// File name of the static interpreter for this architecture.
    pub fn interpreter(&self) -> &'static str {
        match self {
            Self::Armhf | Self::Armel | Self::Arm => "qemu-arm-static",
            Self::Arm64 => "qemu-aarch64-static",
            Self::Mips => "qemu-mips-static",
            Self::Mipsel => "qemu-mipsel-static",
            Self::Mips64el => "qemu-mips64el-static",
            Self::Riscv64 => "qemu-riscv64-static",
            Self::I386 => "qemu-i386-static",
            Self::Amd64 => "qemu-x86_64-static",
        }
    }

    /// Host architectures that execute this architecture's binaries natively.
    pub fn native_hosts(&self) -> &'static [HostArch] {
        const ARM: &[HostArch] = &[HostArch::Arm64, HostArch::Arm];
        const ARM64: &[HostArch] = &[HostArch::Arm64];
        const NONE: &[HostArch] = &[];
        const MIPSEL: &[HostArch] = &[HostArch::Mips64le, HostArch::Mipsle];
        const MIPS64EL: &[HostArch] = &[HostArch::Mips64le];
        const RISCV64: &[HostArch] = &[HostArch::Riscv64];
        const I386: &[HostArch] = &[HostArch::Amd64, HostArch::I386];
        const AMD64: &[HostArch] = &[HostArch::Amd64];

        match self {
            Self::Armhf | Self::Armel | Self::Arm => ARM,
            Self::Arm64 => ARM64,
            Self::Mips => NONE,
            Self::Mipsel => MIPSEL,
            Self::Mips64el => MIPS64EL,
            Self::Riscv64 => RISCV64,
            Self::I386 => I386,
            Self::Amd64 => AMD64,
        }
    }

    pub fn needs_emulation(&self, host: &HostArch) -> bool {
        !self.native_hosts().contains(host)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|arch| arch.as_str() == s)
            .ok_or_else(|| Error::UnsupportedArchitecture(s.to_string()))
    }
}

/// Architecture of the machine running the build, in Debian/Go naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostArch {
    Amd64,
    I386,
    Arm,
    Arm64,
    Mips,
    Mipsle,
    Mips64,
    Mips64le,
    Riscv64,
    Other(String),
}

impl HostArch {
    /// Architecture this binary was compiled for.
    pub fn current() -> Self {
        Self::from_target(std::env::consts::ARCH, cfg!(target_endian = "little"))
    }

    /// Map a Rust target architecture name to the host naming.
    pub fn from_target(arch: &str, little_endian: bool) -> Self {
        match (arch, little_endian) {
            ("x86_64", _) => Self::Amd64,
            ("x86", _) => Self::I386,
            ("arm", _) => Self::Arm,
            ("aarch64", _) => Self::Arm64,
            ("mips", false) => Self::Mips,
            ("mips", true) => Self::Mipsle,
            ("mips64", false) => Self::Mips64,
            ("mips64", true) => Self::Mips64le,
            ("riscv64", _) => Self::Riscv64,
            (other, _) => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Amd64 => "amd64",
            Self::I386 => "386",
            Self::Arm => "arm",
            Self::Arm64 => "arm64",
            Self::Mips => "mips",
            Self::Mipsle => "mipsle",
            Self::Mips64 => "mips64",
            Self::Mips64le => "mips64le",
            Self::Riscv64 => "riscv64",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for HostArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Interpreter location on the host and the path it is installed to in the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulationBinding {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl EmulationBinding {
    /// Decide whether running `arch` binaries in `root` on `host` needs an
    /// interpreter, and where it comes from and goes to.
    ///
    /// Interpreters are looked up in `interpreter_dir` on the host and always
    /// installed under `/usr/bin` in the root.
    pub fn resolve(
        root: Option<&Path>,
        arch: Option<Architecture>,
        host: &HostArch,
        interpreter_dir: &Path,
    ) -> Option<Self> {
        let (root, arch) = (root?, arch?);
        if !arch.needs_emulation(host) {
            debug!("{} runs natively on {}", arch, host);
            return None;
        }

        let binary = arch.interpreter();
        Some(Self {
            source: interpreter_dir.join(binary),
            target: in_root(root, Path::new(INTERPRETER_DIR).join(binary)),
        })
    }
}

/// Keeps an interpreter installed in the root until dropped.
#[derive(Debug)]
pub struct EmulationGuard {
    binding: Option<EmulationBinding>,
}

impl EmulationGuard {
    /// Copy the interpreter into the root.
    ///
    /// The guard is armed before copying, so a failed copy still clears the
    /// target path.
    pub fn install(binding: Option<EmulationBinding>) -> Result<Self> {
        let guard = Self { binding };
        if let Some(binding) = &guard.binding {
            info!(
                "Installing {} as {}",
                binding.source.display(),
                binding.target.display()
            );
            copy_file(&binding.source, &binding.target, 0o755)?;
        }
        Ok(guard)
    }

    pub fn binding(&self) -> Option<&EmulationBinding> {
        self.binding.as_ref()
    }
}

impl Drop for EmulationGuard {
    fn drop(&mut self) {
        let Some(binding) = self.binding.take() else {
            return;
        };

        match std::fs::remove_file(&binding.target) {
            Ok(()) => debug!("Removed {}", binding.target.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", binding.target.display(), e),
        }
    }
}
