//! PID file handling and process liveness checks.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

/// How long `kill` waits for the target to exit after SIGTERM.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Interval between liveness checks while waiting for a target to exit.
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors from PID file operations.
#[derive(Error, Debug)]
pub enum PidFileError {
    #[error("PID file {path} does not contain a valid PID")]
    MissingPid { path: PathBuf },

    #[error("Failed to {action} PID file {path}: {error}")]
    Io {
        action: &'static str,
        path: PathBuf,
        error: String,
    },

    #[error("Failed to signal process {pid}: {error}")]
    Signal { pid: u32, error: String },
}

/// Result of [`PidFile::kill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// No live process was recorded; any stale record was removed
    NotRunning,
    /// The process exited and the record is gone
    Stopped { pid: u32 },
    /// The process was signalled but outlived the grace period
    StillRunning { pid: u32 },
}

/// A file recording the PID of the running daemon.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the recorded PID.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// - `PidFileError::MissingPid` when the file exists but holds no
    ///   positive integer
    /// - `PidFileError::Io` when the file cannot be read
    pub fn read(&self) -> Result<Option<u32>, PidFileError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PidFileError::Io {
                    action: "read",
                    path: self.path.clone(),
                    error: e.to_string(),
                })
            }
        };

        parse_pid(&contents)
            .map(Some)
            .ok_or_else(|| PidFileError::MissingPid {
                path: self.path.clone(),
            })
    }

    /// Records the current process ID, creating parent directories.
    ///
    /// The record is staged in a sibling file and renamed into place, so a
    /// concurrent reader sees either the old record or the new one.
    pub fn write(&self) -> Result<(), PidFileError> {
        let io_error = |action: &'static str, e: io::Error| PidFileError::Io {
            action,
            path: self.path.clone(),
            error: e.to_string(),
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_error("create directory for", e))?;
        }

        let staging = self.staging_path();
        fs::write(&staging, format!("{}\n", process::id())).map_err(|e| io_error("write", e))?;
        if let Err(e) = fs::rename(&staging, &self.path) {
            let _ = fs::remove_file(&staging);
            return Err(io_error("replace", e));
        }

        debug!(path = %self.path.display(), pid = process::id(), "Wrote PID file");
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!(".{name}.{}.tmp", process::id()))
    }

    /// Removes the record. A missing file is not an error.
    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed PID file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove PID file"),
        }
    }

    /// Removes the record only if it names this process.
    pub fn remove_if_owned(&self) -> bool {
        match self.read() {
            Ok(Some(pid)) if pid == process::id() => {
                self.remove();
                true
            }
            _ => false,
        }
    }

    /// PID of the recorded process, if it is alive.
    pub fn running_pid(&self) -> Result<Option<u32>, PidFileError> {
        Ok(self.read()?.filter(|pid| is_process_alive(*pid)))
    }

    pub fn is_running(&self) -> Result<bool, PidFileError> {
        Ok(self.running_pid()?.is_some())
    }

    /// Sends SIGTERM to the recorded process and waits up to `grace` for it
    /// to go away.
    ///
    /// The record is removed once the process is confirmed gone, or if it
    /// was already stale. The daemon removing its own record on shutdown
    /// also counts as gone.
    pub fn kill(&self, grace: Duration) -> Result<KillOutcome, PidFileError> {
        let Some(pid) = self.read()? else {
            return Ok(KillOutcome::NotRunning);
        };

        if !is_process_alive(pid) {
            info!(pid, path = %self.path.display(), "Removing stale PID file");
            self.remove();
            return Ok(KillOutcome::NotRunning);
        }

        info!(pid, "Sending SIGTERM");
        send_signal(pid, libc::SIGTERM)?;

        let deadline = Instant::now() + grace;
        loop {
            if !is_process_alive(pid) || !self.path.exists() {
                self.remove();
                return Ok(KillOutcome::Stopped { pid });
            }
            if Instant::now() >= deadline {
                warn!(pid, grace_ms = grace.as_millis() as u64, "Process still running");
                return Ok(KillOutcome::StillRunning { pid });
            }
            thread::sleep(KILL_POLL_INTERVAL);
        }
    }
}

fn parse_pid(contents: &str) -> Option<u32> {
    contents
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0 && libc::pid_t::try_from(*pid).is_ok())
}

/// Checks whether a process exists, using the null signal.
///
/// A process owned by another user (EPERM) counts as alive.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 delivers nothing; it only performs the
    // existence and permission checks.
    let result = unsafe { libc::kill(pid, 0) };
    result == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn send_signal(pid: u32, signal: libc::c_int) -> Result<(), PidFileError> {
    let target = libc::pid_t::try_from(pid).map_err(|e| PidFileError::Signal {
        pid,
        error: e.to_string(),
    })?;
    // SAFETY: plain syscall on a PID validated as positive by parse_pid.
    let result = unsafe { libc::kill(target, signal) };
    if result != 0 {
        return Err(PidFileError::Signal {
            pid,
            error: io::Error::last_os_error().to_string(),
        });
    }
    Ok(())
}
