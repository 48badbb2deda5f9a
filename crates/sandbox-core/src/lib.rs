//! Command execution on the host, in a chroot or in a namespace container,
//! with the root's DNS configuration, foreign-architecture emulation and
//! service activation handled around each run.

#![cfg(target_os = "linux")]

pub mod command;
pub mod config;
pub mod context;
pub mod emulation;
pub mod error;
pub mod output;
pub mod process;

pub type Result<T> = std::result::Result<T, error::Error>;

pub use command::{Command, IsolationMode};
pub use config::{RunFile, ToolConfig};
pub use context::BuildContext;
pub use emulation::{Architecture, EmulationBinding, EmulationGuard, HostArch};
pub use error::Error;
pub use output::{BufferSink, LineSink, OutputCapture, TracingSink};
pub use process::Runner;

pub use sandbox_fs::{NoServiceGate, PolicyRcGate, ServiceGate};
