//! Integration tests for chrooted command execution.
//!
//! Runs go through a stand-in chroot launcher (`sh -c 'cd "$0" && exec "$@"'`)
//! so they work without privileges: commands see the root as their working
//! directory and address files in it with relative paths.

#![cfg(target_os = "linux")]

use sandbox_core::{
    BufferSink, Command, Error, HostArch, IsolationMode, Runner, ServiceGate, ToolConfig,
};
use sandbox_fs::resolv::GENERATED_MARKER;
use sandbox_fs::PolicyRcGate;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const HOST_CONF: &str = "nameserver 192.0.2.53\noptions edns0\n";
const ROOT_CONF: &str = "nameserver 198.51.100.1\n";

/// Enters the root by changing into it.
const FAKE_CHROOT: &str = r#"cd "$0" && exec "$@""#;

/// Prints its arguments, then enters the root named after `-D`.
const FAKE_NSPAWN: &str = r#"
printf 'arg %s\n' "$0" "$@"
while [ "$#" -gt 0 ] && [ "$1" != "-D" ]; do shift; done
shift
root="$1"
shift
cd "$root" && exec "$@"
"#;

#[derive(Default)]
struct RecordingGate {
    calls: Mutex<Vec<&'static str>>,
}

impl ServiceGate for RecordingGate {
    fn deny(&self, _root: &Path) -> sandbox_fs::Result<()> {
        self.calls.lock().unwrap().push("deny");
        Ok(())
    }

    fn allow(&self, _root: &Path) -> sandbox_fs::Result<()> {
        self.calls.lock().unwrap().push("allow");
        Ok(())
    }
}

/// A scratch root filesystem plus a host side with DNS config and interpreters.
struct TestRoot {
    _temp_dir: TempDir,
    root: PathBuf,
    host_bin: PathBuf,
    tools: ToolConfig,
    sink: Arc<BufferSink>,
    gate: Arc<RecordingGate>,
}

impl TestRoot {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        for dir in ["etc", "usr/bin", "usr/sbin"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::write(root.join("etc/resolv.conf"), ROOT_CONF).unwrap();

        let host_conf = temp_dir.path().join("host-resolv.conf");
        fs::write(&host_conf, HOST_CONF).unwrap();
        let host_bin = temp_dir.path().join("host-bin");
        fs::create_dir_all(&host_bin).unwrap();

        let tools = ToolConfig {
            chroot_launcher: vec!["sh".into(), "-c".into(), FAKE_CHROOT.into()],
            container_launcher: vec!["sh".into(), "-c".into(), FAKE_NSPAWN.into()],
            host_resolv_conf: host_conf,
            interpreter_dir: host_bin.clone(),
        };

        Self {
            _temp_dir: temp_dir,
            root,
            host_bin,
            tools,
            sink: Arc::new(BufferSink::new()),
            gate: Arc::new(RecordingGate::default()),
        }
    }

    fn runner(&self) -> Runner {
        Runner::new()
            .with_tools(self.tools.clone())
            .with_host_arch(HostArch::Amd64)
            .with_service_gate(self.gate.clone())
            .with_sink(self.sink.clone())
    }

    fn command(&self, method: IsolationMode) -> Command {
        Command::in_root(&self.root, method)
    }

    fn resolv_conf(&self) -> PathBuf {
        self.root.join("etc/resolv.conf")
    }

    fn sidecar(&self) -> PathBuf {
        self.root.join("etc/resolv.conf.debos")
    }

    fn gate_calls(&self) -> Vec<&'static str> {
        self.gate.calls.lock().unwrap().clone()
    }
}

fn overlay() -> String {
    format!("{GENERATED_MARKER}{HOST_CONF}")
}

#[test]
fn test_untouched_dns_configuration_round_trips() {
    for method in [IsolationMode::ClassicChroot, IsolationMode::NamespaceContainer] {
        let t = TestRoot::new();
        t.runner()
            .run(&t.command(method), "noop", &["true"])
            .unwrap();

        assert_eq!(fs::read_to_string(t.resolv_conf()).unwrap(), ROOT_CONF);
        assert!(!t.sidecar().exists(), "{method}: side-car left behind");
        assert_eq!(t.gate_calls(), vec!["deny", "allow"]);
    }
}

#[test]
fn test_command_sees_host_dns_configuration() {
    let t = TestRoot::new();
    t.runner()
        .run(
            &t.command(IsolationMode::ClassicChroot),
            "cat",
            &["cat", "etc/resolv.conf"],
        )
        .unwrap();

    let expected: Vec<String> = overlay().lines().map(String::from).collect();
    assert_eq!(t.sink.texts(), expected);
    assert_eq!(fs::read_to_string(t.resolv_conf()).unwrap(), ROOT_CONF);
}

#[test]
fn test_root_without_dns_configuration() {
    let t = TestRoot::new();
    fs::remove_file(t.resolv_conf()).unwrap();

    t.runner()
        .run(&t.command(IsolationMode::ClassicChroot), "noop", &["true"])
        .unwrap();

    assert!(fs::symlink_metadata(t.resolv_conf()).is_err());
    assert!(!t.sidecar().exists());
}

#[test]
fn test_rewritten_dns_configuration_is_kept() {
    let t = TestRoot::new();
    t.runner()
        .run(
            &t.command(IsolationMode::ClassicChroot),
            "rewrite",
            &["sh", "-c", "echo 'nameserver 203.0.113.7' > etc/resolv.conf"],
        )
        .unwrap();

    assert_eq!(
        fs::read_to_string(t.resolv_conf()).unwrap(),
        "nameserver 203.0.113.7\n"
    );
    assert!(!t.sidecar().exists());
}

#[test]
fn test_symlinked_dns_configuration_is_kept() {
    let t = TestRoot::new();
    t.runner()
        .run(
            &t.command(IsolationMode::ClassicChroot),
            "relink",
            &[
                "sh",
                "-c",
                "rm etc/resolv.conf && ln -s ../run/systemd/resolve/stub-resolv.conf etc/resolv.conf",
            ],
        )
        .unwrap();

    assert_eq!(
        fs::read_link(t.resolv_conf()).unwrap(),
        PathBuf::from("../run/systemd/resolve/stub-resolv.conf")
    );
    assert!(!t.sidecar().exists());
}

#[test]
fn test_failed_command_leaves_dns_overlay_in_place() {
    let t = TestRoot::new();
    let err = t
        .runner()
        .run(
            &t.command(IsolationMode::ClassicChroot),
            "fail",
            &["sh", "-c", "echo partial; printf unterminated; exit 3"],
        )
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(3));
    assert_eq!(fs::read_to_string(t.resolv_conf()).unwrap(), overlay());
    assert_eq!(fs::read_to_string(t.sidecar()).unwrap(), ROOT_CONF);
    // Teardown still happens
    assert_eq!(t.sink.texts(), vec!["partial", "unterminated"]);
    assert_eq!(t.gate_calls(), vec!["deny", "allow"]);
}

#[test]
fn test_foreign_architecture_interpreter_lives_for_the_run() {
    let t = TestRoot::new();
    fs::write(t.host_bin.join("qemu-arm-static"), "#!/bin/sh\n").unwrap();
    let interpreter = t.root.join("usr/bin/qemu-arm-static");

    let mut cmd = t
        .command(IsolationMode::NamespaceContainer)
        .with_architecture("armhf");
    cmd.add_bind_mount("/pkg/app.deb", None);

    t.runner()
        .run(&cmd, "emulated", &["test", "-x", "usr/bin/qemu-arm-static"])
        .unwrap();
    assert!(!interpreter.exists());

    let texts = t.sink.texts();
    let root = format!("arg {}", t.root.display());
    assert_eq!(texts.first().map(String::as_str), Some("arg -q"));
    assert!(texts.windows(2).any(|w| w[0] == "arg --bind" && w[1] == "arg /pkg/app.deb"));
    assert_eq!(
        &texts[texts.len() - 5..],
        ["arg -D", root.as_str(), "arg test", "arg -x", "arg usr/bin/qemu-arm-static"]
    );
}

#[test]
fn test_interpreter_removed_after_failure() {
    let t = TestRoot::new();
    fs::write(t.host_bin.join("qemu-aarch64-static"), "").unwrap();
    let cmd = t
        .command(IsolationMode::ClassicChroot)
        .with_architecture("arm64");

    assert!(t.runner().run(&cmd, "fail", &["false"]).is_err());
    assert!(!t.root.join("usr/bin/qemu-aarch64-static").exists());
}

#[test]
fn test_native_architecture_needs_no_interpreter() {
    let t = TestRoot::new();
    let cmd = t
        .command(IsolationMode::ClassicChroot)
        .with_architecture("i386");

    // No interpreter exists on the host, so any copy attempt would fail
    t.runner()
        .run(&cmd, "native", &["sh", "-c", "! ls usr/bin | grep -q qemu"])
        .unwrap();
}

#[test]
fn test_missing_interpreter_aborts_before_spawn() {
    let t = TestRoot::new();
    let cmd = t
        .command(IsolationMode::ClassicChroot)
        .with_architecture("riscv64");

    let err = t
        .runner()
        .run(&cmd, "never", &["touch", "ran"])
        .unwrap_err();

    assert!(matches!(err, Error::Filesystem(_)));
    assert!(!t.root.join("ran").exists());
    assert!(t.gate_calls().is_empty());
    assert_eq!(fs::read_to_string(t.resolv_conf()).unwrap(), ROOT_CONF);
}

#[test]
fn test_environment_reaches_commands() {
    let t = TestRoot::new();
    let mut cmd = t.command(IsolationMode::ClassicChroot);
    cmd.add_env_key("SUITE", "bookworm");
    t.runner()
        .run(&cmd, "env", &["sh", "-c", "echo \"suite=$SUITE\""])
        .unwrap();
    assert_eq!(t.sink.texts(), vec!["suite=bookworm"]);

    let t = TestRoot::new();
    let mut cmd = t.command(IsolationMode::NamespaceContainer);
    cmd.add_env_key("SUITE", "bookworm");
    t.runner().run(&cmd, "env", &["true"]).unwrap();
    let texts = t.sink.texts();
    assert!(texts
        .windows(2)
        .any(|w| w[0] == "arg --setenv" && w[1] == "arg SUITE=bookworm"));
}

#[test]
fn test_policy_rc_gate_blocks_services_during_run() {
    let t = TestRoot::new();
    let runner = t.runner().with_service_gate(Arc::new(PolicyRcGate::new()));

    runner
        .run(
            &t.command(IsolationMode::ClassicChroot),
            "services",
            &["sh", "-c", "usr/sbin/policy-rc.d; echo \"policy=$?\""],
        )
        .unwrap();

    assert_eq!(t.sink.texts(), vec!["policy=101"]);
    assert!(!PolicyRcGate::policy_file(&t.root).exists());
}

#[test]
fn test_shipped_service_policy_survives_run() {
    let t = TestRoot::new();
    let policy = PolicyRcGate::policy_file(&t.root);
    fs::write(&policy, PolicyRcGate::POLICY_SCRIPT).unwrap();

    t.runner()
        .with_service_gate(Arc::new(PolicyRcGate::new()))
        .run(&t.command(IsolationMode::ClassicChroot), "noop", &["true"])
        .unwrap();

    assert_eq!(
        fs::read_to_string(&policy).unwrap(),
        PolicyRcGate::POLICY_SCRIPT
    );
}

#[test]
fn test_host_mode_still_installs_interpreter() {
    let t = TestRoot::new();
    fs::write(t.host_bin.join("qemu-arm-static"), "").unwrap();
    let interpreter = t.root.join("usr/bin/qemu-arm-static");
    let cmd = t.command(IsolationMode::None).with_architecture("armel");

    t.runner()
        .run(
            &cmd,
            "host",
            &["test", "-x", interpreter.to_str().unwrap()],
        )
        .unwrap();

    assert!(!interpreter.exists());
    assert!(t.gate_calls().is_empty());
}

#[test]
fn test_host_mode_leaves_root_alone() {
    let t = TestRoot::new();
    let cmd = t.command(IsolationMode::None);

    t.runner()
        .run(&cmd, "host", &["sh", "-c", "echo host"])
        .unwrap();

    assert_eq!(t.sink.texts(), vec!["host"]);
    assert!(t.gate_calls().is_empty());
    assert_eq!(fs::read_to_string(t.resolv_conf()).unwrap(), ROOT_CONF);
}
