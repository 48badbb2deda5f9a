//! Process execution and lifecycle management for chrooted commands.

use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{Command as ProcessCommand, Stdio};
use std::sync::Arc;
use tracing::{debug, info, warn};

use sandbox_fs::{PolicyRcGate, ResolvConfGuard, ServiceGate};

use crate::command::{Command, IsolationMode};
use crate::config::ToolConfig;
use crate::emulation::{EmulationBinding, EmulationGuard, HostArch};
use crate::error::Error;
use crate::output::{LineSink, OutputCapture, TracingSink};
use crate::Result;

/// Runs commands described by [`Command`] with DNS, emulation and service
/// guards around them.
///
/// Runs against the same root must not overlap: the DNS side-car file and the
/// injected interpreter live at fixed paths inside the root.
#[derive(Clone)]
pub struct Runner {
    tools: ToolConfig,
    host_arch: HostArch,
    services: Arc<dyn ServiceGate>,
    sink: Arc<dyn LineSink>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// A runner using the system tools, the `policy-rc.d` service gate and
    /// logging captured output through `tracing`.
    pub fn new() -> Self {
        Self {
            tools: ToolConfig::default(),
            host_arch: HostArch::current(),
            services: Arc::new(PolicyRcGate::new()),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_tools(mut self, tools: ToolConfig) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_host_arch(mut self, host_arch: HostArch) -> Self {
        self.host_arch = host_arch;
        self
    }

    pub fn with_service_gate(mut self, services: Arc<dyn ServiceGate>) -> Self {
        self.services = services;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LineSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Run `cmdline` as configured by `cmd`, labelling its output with `label`.
    ///
    /// Blocks until the command exits. The original DNS configuration is only
    /// restored when the command succeeds; after a failure the host overlay and
    /// the side-car file are left in the root. Captured output is flushed, the
    /// service gate reopened and the interpreter removed on every path out.
    pub fn run<S: AsRef<str>>(&self, cmd: &Command, label: &str, cmdline: &[S]) -> Result<()> {
        if cmdline.is_empty() {
            return Err(Error::EmptyCommand);
        }
        let arch = cmd.validate()?;
        let root = cmd.chroot_path();

        let binding =
            EmulationBinding::resolve(root, arch, &self.host_arch, &self.tools.interpreter_dir);
        let _emulation = EmulationGuard::install(binding)?;

        let argv = cmd.argv(&self.tools, cmdline)?;
        debug!("{}: {:?}", label, argv);

        let entered_root = root.filter(|_| cmd.method.uses_root());

        // Disable services start/stop for commands running in the root
        let _services = entered_root.map(|root| ServiceGuard::deny(self.services.as_ref(), root));

        let resolv = match entered_root {
            Some(root) => {
                ResolvConfGuard::new(root).with_host_conf(&self.tools.host_resolv_conf)
            }
            None => ResolvConfGuard::disabled(),
        };
        let resolv_sum = resolv.save()?;

        let mut capture = OutputCapture::new(label, self.sink.clone());
        info!("Running {} ({} mode)", label, cmd.method);
        self.execute(cmd, &argv, &mut capture)?;

        resolv.restore(resolv_sum.as_ref())?;
        capture.finish();
        Ok(())
    }

    fn execute(&self, cmd: &Command, argv: &[String], capture: &mut OutputCapture) -> Result<()> {
        let (program, args) = argv.split_first().ok_or(Error::EmptyCommand)?;

        // One pipe for both streams keeps their relative order
        let (reader, writer) = pipe2(OFlag::O_CLOEXEC).map_err(io::Error::from)?;

        let mut child = {
            let mut exe = ProcessCommand::new(program);
            exe.args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::from(writer.try_clone()?))
                .stderr(Stdio::from(writer));

            // Rooted modes take the directory through the launcher
            if cmd.method == IsolationMode::None {
                if let Some(dir) = cmd.working_dir() {
                    exe.current_dir(dir);
                }
            }

            // nspawn receives the environment through --setenv
            if cmd.method != IsolationMode::NamespaceContainer {
                exe.envs(cmd.env_pairs());
            }

            exe.spawn().map_err(|e| Error::Spawn {
                program: program.clone(),
                source: e,
            })?
            // `exe` drops here, closing our copies of the write end
        };

        let copied = io::copy(&mut File::from(reader), capture);
        let status = child.wait()?;
        copied?;

        if status.success() {
            debug!("{} exited successfully", program);
            Ok(())
        } else {
            Err(Error::Exited {
                program: program.clone(),
                status,
            })
        }
    }
}

/// Reopens the service gate when dropped, if it was closed.
struct ServiceGuard<'a> {
    gate: &'a dyn ServiceGate,
    root: &'a Path,
    denied: bool,
}

impl<'a> ServiceGuard<'a> {
    fn deny(gate: &'a dyn ServiceGate, root: &'a Path) -> Self {
        let denied = match gate.deny(root) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to disable services in {}: {}", root.display(), e);
                false
            }
        };
        Self { gate, root, denied }
    }
}

impl Drop for ServiceGuard<'_> {
    fn drop(&mut self) {
        if !self.denied {
            return;
        }
        if let Err(e) = self.gate.allow(self.root) {
            warn!("Failed to re-enable services in {}: {}", self.root.display(), e);
        }
    }
}

impl Command {
    /// Run `cmdline` with a default [`Runner`].
    pub fn run<S: AsRef<str>>(&self, label: &str, cmdline: &[S]) -> Result<()> {
        Runner::new().run(self, label, cmdline)
    }
}
