//! Daemon process supervision.
//!
//! The [`Supervisor`] owns the process lifecycle of a [`DaemonService`]:
//!
//! ```text
//! start()
//!   │  duplicate check ── live PID recorded ──▶ DuplicateInstance
//!   │  is_configured()  ── false ─────────────▶ NotConfigured
//!   │  detach (daemon mode only)
//!   ▼
//! run()
//!   │  trap SIGINT/SIGTERM
//!   │  write PID file
//!   │  service.initialize()
//!   ▼
//! execution loop ── until a signal is trapped
//!   │  service.poll()
//!   │  sleep(poll_interval)
//!   ▼
//! shutdown
//!      service.teardown()
//!      remove PID file
//!      exit code = trapped signal number
//! ```
//!
//! The service is single-threaded from the supervisor's point of view:
//! hooks are awaited one at a time on a current-thread runtime.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A failed startup removes the PID file before returning its error

mod detach;
mod pidfile;
mod signal;

pub use detach::detach;
pub use pidfile::{is_process_alive, KillOutcome, PidFile, PidFileError, DEFAULT_KILL_GRACE};
pub use signal::{SignalTrap, StopHandle, TRAPPED_SIGNALS};

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info};

/// Default pause between service polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Error Types
// ============================================================================

/// Errors that stop the supervisor from running a service.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Another instance is already running (PID {pid}, PID file {path})")]
    DuplicateInstance { pid: u32, path: PathBuf },

    #[error("Service is not configured")]
    NotConfigured,

    #[error(transparent)]
    PidFile(#[from] PidFileError),

    #[error("Failed to install signal handlers: {0}")]
    SignalTrap(String),

    #[error("Failed to detach from the terminal: {0}")]
    Detach(String),

    #[error("Failed to build async runtime: {0}")]
    Runtime(String),

    #[error("Service failed to initialize: {0}")]
    Initialize(String),
}

// ============================================================================
// Service Hooks
// ============================================================================

/// The work a supervised daemon performs.
#[async_trait]
pub trait DaemonService: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Checked before detaching; a service that returns false is not started.
    fn is_configured(&self) -> bool {
        true
    }

    /// Called once, after the PID file is written.
    async fn initialize(&mut self) -> Result<(), Self::Error>;

    /// One unit of work. Called repeatedly until a shutdown is requested.
    async fn poll(&mut self);

    /// Called once during shutdown.
    async fn teardown(&mut self) {}
}

// ============================================================================
// Supervisor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Stay attached to the terminal
    Foreground,
    /// Fork into the background before running
    Daemon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Running,
    ShuttingDown,
    Terminated,
    DuplicateRejected,
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub pid_file: PathBuf,

    /// Receives stdout and stderr in daemon mode
    pub log_file: PathBuf,

    pub mode: StartMode,

    /// Pause between polls; zero yields to the runtime instead of sleeping
    pub poll_interval: Duration,
}

/// Runs a [`DaemonService`] as a process-level daemon.
pub struct Supervisor<S> {
    options: SupervisorOptions,
    service: S,
    pid_file: PidFile,
    trap: SignalTrap,
    state: SupervisorState,
}

impl<S: DaemonService> Supervisor<S> {
    pub fn new(options: SupervisorOptions, service: S) -> Self {
        let pid_file = PidFile::new(options.pid_file.clone());
        Self {
            options,
            service,
            pid_file,
            trap: SignalTrap::new(),
            state: SupervisorState::NotStarted,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    pub fn into_service(self) -> S {
        self.service
    }

    /// PID of the supervising process.
    pub fn pid(&self) -> u32 {
        process::id()
    }

    /// Handle that stops the execution loop as if `signal` had arrived.
    pub fn stop_handle(&self) -> StopHandle {
        self.trap.stop_handle()
    }

    /// Checks for a live instance recorded in the PID file.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::DuplicateInstance` when the recorded PID is alive
    /// - `SupervisorError::PidFile` when the record exists but is unreadable
    pub fn duplicate_check(&mut self) -> Result<(), SupervisorError> {
        match self.pid_file.running_pid()? {
            Some(pid) => {
                error!(
                    pid,
                    path = %self.pid_file.path().display(),
                    "Port agent already running"
                );
                self.state = SupervisorState::DuplicateRejected;
                Err(SupervisorError::DuplicateInstance {
                    pid,
                    path: self.pid_file.path().to_path_buf(),
                })
            }
            None => Ok(()),
        }
    }

    /// Full start sequence: checks, optional detach, then the service loop
    /// on a fresh current-thread runtime.
    ///
    /// Returns the trapped signal number, to be used as the exit code.
    pub fn start(mut self) -> Result<i32, SupervisorError> {
        self.duplicate_check()?;

        if !self.service.is_configured() {
            error!("Refusing to start an unconfigured service");
            return Err(SupervisorError::NotConfigured);
        }

        match self.options.mode {
            StartMode::Foreground => debug!("Running in the foreground"),
            StartMode::Daemon => {
                info!(log_file = %self.options.log_file.display(), "Detaching");
                detach(&self.options.log_file)?;
            }
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SupervisorError::Runtime(e.to_string()))?;

        runtime.block_on(self.run())
    }

    /// Runs the service in the current runtime until a stop is requested.
    ///
    /// Skips the duplicate and configuration checks done by `start`.
    pub async fn run(&mut self) -> Result<i32, SupervisorError> {
        if let Err(e) = self.startup().await {
            error!(error = %e, "Startup failed");
            self.pid_file.remove_if_owned();
            self.state = SupervisorState::Terminated;
            return Err(e);
        }

        info!(
            pid = self.pid(),
            pid_file = %self.pid_file.path().display(),
            "Port agent running"
        );
        self.execution_loop().await;
        Ok(self.shutdown().await)
    }

    async fn startup(&mut self) -> Result<(), SupervisorError> {
        self.trap
            .install()
            .map_err(|e| SupervisorError::SignalTrap(e.to_string()))?;
        self.pid_file.write()?;
        self.service
            .initialize()
            .await
            .map_err(|e| SupervisorError::Initialize(e.to_string()))?;
        self.state = SupervisorState::Running;
        Ok(())
    }

    async fn execution_loop(&mut self) {
        while self.trap.trapped().is_none() {
            self.service.poll().await;
            self.pause().await;
        }
    }

    async fn pause(&self) {
        if self.options.poll_interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    async fn shutdown(&mut self) -> i32 {
        self.state = SupervisorState::ShuttingDown;
        let signal = self.trap.trapped().unwrap_or(0);
        info!(signal, "Shutting down");

        self.service.teardown().await;
        self.pid_file.remove_if_owned();

        self.state = SupervisorState::Terminated;
        info!(exit_code = signal, "Port agent stopped");
        signal
    }
}
