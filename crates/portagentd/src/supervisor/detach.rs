//! Detaching from the controlling terminal.

use std::fs::{self, OpenOptions};
use std::path::Path;

use daemonize::Daemonize;

use super::SupervisorError;

/// Forks into the background.
///
/// The parent exits inside this call. The child starts a new session,
/// clears its umask, moves to `/` and sends stdout and stderr to
/// `log_file`. Must run before any tokio runtime is built.
pub fn detach(log_file: &Path) -> Result<(), SupervisorError> {
    let detach_error = |e: &dyn std::fmt::Display| SupervisorError::Detach(e.to_string());

    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| detach_error(&e))?;
    }

    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| detach_error(&e))?;
    let stderr = stdout.try_clone().map_err(|e| detach_error(&e))?;

    Daemonize::new()
        .working_directory("/")
        .umask(0u32)
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .map_err(|e| detach_error(&e))
}
