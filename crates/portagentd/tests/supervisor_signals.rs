//! Real signal delivery to a supervised service.
//!
//! Kept in its own test binary: a raised signal reaches every trap
//! installed in the process.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;
use portagentd::supervisor::{DaemonService, StartMode, Supervisor, SupervisorOptions};

/// Raises SIGINT against its own process after a few polls.
#[derive(Default)]
struct SelfSignalling {
    polls: usize,
}

#[async_trait]
impl DaemonService for SelfSignalling {
    type Error = Infallible;

    async fn initialize(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    async fn poll(&mut self) {
        self.polls += 1;
        if self.polls == 3 {
            // SAFETY: the supervisor's handlers are installed before polling
            // starts, so SIGINT is recorded rather than terminating the test.
            unsafe {
                libc::raise(libc::SIGINT);
            }
        }
    }
}

#[tokio::test]
async fn test_sigint_stops_loop_with_signal_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let options = SupervisorOptions {
        pid_file: dir.path().join("agent.pid"),
        log_file: dir.path().join("agent.log"),
        mode: StartMode::Foreground,
        poll_interval: Duration::from_millis(1),
    };
    let mut supervisor = Supervisor::new(options, SelfSignalling::default());

    let code = supervisor.run().await.unwrap();

    assert_eq!(code, libc::SIGINT);
    assert_eq!(supervisor.service().polls, 3);
    assert!(!dir.path().join("agent.pid").exists());
}
