//! End-to-end tests for the `portagentd` binary.
//!
//! These spawn the real executable against a loopback "instrument",
//! exercise the data path through the log publisher and verify the
//! PID-file and signal-driven shutdown contract.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::fs;
use std::io::{ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for the daemon to reach a state
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between state checks
const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Test Helpers
// ============================================================================

struct TestAgent {
    dir: TempDir,
    config_path: PathBuf,
}

impl TestAgent {
    /// Writes a config pointing the data channel at `data_port`.
    fn new(data_port: u16) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config_path = dir.path().join("agent.toml");
        let config = format!(
            r#"
pid_file = "{pid}"
log_file = "{log}"
poll_interval_ms = 10

[connection]
type = "tcp"
data_host = "127.0.0.1"
data_port = {data_port}

[framing]
mode = "delimited"
delimiter = "\n"

[[publishers]]
type = "log"
path = "{packets}"
"#,
            pid = dir.path().join("agent.pid").display(),
            log = dir.path().join("agent.log").display(),
            packets = dir.path().join("packets.log").display(),
        );
        fs::write(&config_path, config).expect("write config");
        Self { dir, config_path }
    }

    fn pid_path(&self) -> PathBuf {
        self.dir.path().join("agent.pid")
    }

    fn log_path(&self) -> PathBuf {
        self.dir.path().join("agent.log")
    }

    fn packets_path(&self) -> PathBuf {
        self.dir.path().join("packets.log")
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_portagentd"));
        command
            .arg("--config")
            .arg(&self.config_path)
            .args(args)
            .env_remove("PORT_AGENT_CONFIG");
        command
    }

    fn spawn(&self) -> Child {
        self.command(&["start"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn portagentd")
    }

    fn output(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("run portagentd")
    }
}

fn wait_for<T>(what: &str, mut check: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(value) = check() {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(POLL_INTERVAL);
    }
}

fn accept(listener: &TcpListener) -> TcpStream {
    listener.set_nonblocking(true).unwrap();
    wait_for("daemon to connect", || match listener.accept() {
        Ok((stream, _)) => Some(stream),
        Err(e) if e.kind() == ErrorKind::WouldBlock => None,
        Err(e) => panic!("accept failed: {e}"),
    })
}

fn wait_exit(child: &mut Child) -> ExitStatus {
    wait_for("daemon to exit", || child.try_wait().unwrap())
}

fn terminate(child: &Child) {
    let pid = libc::pid_t::try_from(child.id()).unwrap();
    assert_eq!(unsafe { libc::kill(pid, libc::SIGTERM) }, 0);
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_sigterm_stops_daemon_and_removes_pid_file() {
    let instrument = TcpListener::bind("127.0.0.1:0").unwrap();
    let agent = TestAgent::new(instrument.local_addr().unwrap().port());
    let mut child = agent.spawn();

    let recorded = wait_for("PID file", || {
        fs::read_to_string(agent.pid_path())
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
    });
    assert_eq!(recorded, child.id());

    // Data flows from the instrument into the packet log
    let mut socket = accept(&instrument);
    socket.write_all(b"T=12.5\nT=12.").unwrap();
    let contents = wait_for("packet log", || {
        fs::read_to_string(agent.packets_path())
            .ok()
            .filter(|c| c.contains("instrument_data"))
    });
    assert!(contents.contains(" instrument_data 7 T=12.5\\n\n"));
    assert!(contents.contains(" status "));
    assert!(!contents.contains("T=12.\n"));

    terminate(&child);
    let status = wait_exit(&mut child);

    assert_eq!(status.code(), Some(libc::SIGTERM));
    assert!(!agent.pid_path().exists());
}

#[test]
fn test_second_instance_is_rejected() {
    let instrument = TcpListener::bind("127.0.0.1:0").unwrap();
    let agent = TestAgent::new(instrument.local_addr().unwrap().port());

    // Record a live process (this test) as the running instance
    fs::write(agent.pid_path(), format!("{}\n", std::process::id())).unwrap();

    let output = agent.output(&["start"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("already running"));

    // The existing record is left alone
    assert!(agent.pid_path().exists());
}

#[test]
fn test_stop_command_terminates_daemon() {
    let instrument = TcpListener::bind("127.0.0.1:0").unwrap();
    let agent = TestAgent::new(instrument.local_addr().unwrap().port());
    let mut child = agent.spawn();
    wait_for("PID file", || agent.pid_path().exists().then_some(()));

    let status = agent.output(&["status"]);
    assert_eq!(status.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&status.stdout).contains(&child.id().to_string()));

    let stop = agent.output(&["stop"]);
    assert_eq!(stop.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&stop.stdout).contains("stopped"));

    assert_eq!(wait_exit(&mut child).code(), Some(libc::SIGTERM));
    assert!(!agent.pid_path().exists());
}

#[test]
fn test_daemon_mode_detaches() {
    let instrument = TcpListener::bind("127.0.0.1:0").unwrap();
    let agent = TestAgent::new(instrument.local_addr().unwrap().port());

    let mut launcher = agent
        .command(&["start", "-d"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn portagentd");
    assert_eq!(wait_exit(&mut launcher).code(), Some(0));

    let daemon = wait_for("PID file", || {
        fs::read_to_string(agent.pid_path())
            .ok()
            .and_then(|s| s.trim().parse::<libc::pid_t>().ok())
    });
    assert_ne!(u32::try_from(daemon).unwrap(), launcher.id());

    // Running in a session of its own, away from the test's terminal
    let daemon_session = unsafe { libc::getsid(daemon) };
    assert!(daemon_session > 0);
    assert_ne!(daemon_session, unsafe { libc::getsid(0) });

    let proc_dir = PathBuf::from(format!("/proc/{daemon}"));
    if proc_dir.exists() {
        assert_eq!(fs::read_link(proc_dir.join("cwd")).unwrap(), PathBuf::from("/"));
        let status = fs::read_to_string(proc_dir.join("status")).unwrap();
        assert!(status.contains("Umask:\t0000"));
    }

    // stdout and stderr now go to the log file
    wait_for("daemon log output", || {
        fs::read_to_string(agent.log_path())
            .ok()
            .filter(|log| log.contains("Port agent running"))
    });

    let _socket = accept(&instrument);

    let stop = agent.output(&["stop"]);
    assert_eq!(stop.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&stop.stdout).contains(&daemon.to_string()));
    assert!(!agent.pid_path().exists());
}

#[test]
fn test_corrupt_pid_file_blocks_start() {
    let agent = TestAgent::new(1);
    fs::write(agent.pid_path(), "not-a-pid").unwrap();

    let output = agent.output(&["start"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not contain a valid PID"));
}

#[test]
fn test_status_and_stop_without_daemon() {
    let agent = TestAgent::new(1);

    let status = agent.output(&["status"]);
    assert_eq!(status.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&status.stdout).contains("not running"));

    let stop = agent.output(&["stop"]);
    assert_eq!(stop.status.code(), Some(0));
}
