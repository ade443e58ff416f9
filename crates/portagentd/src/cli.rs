//! Command-line interface.
//!
//! ```bash
//! # Start in the foreground
//! portagentd -c /etc/portagent/ctd.toml start
//!
//! # Start detached
//! portagentd -c /etc/portagent/ctd.toml start -d
//!
//! # Stop / query the instance recorded in the PID file
//! portagentd -c /etc/portagent/ctd.toml stop
//! portagentd -c /etc/portagent/ctd.toml status
//!
//! # Debug logging
//! RUST_LOG=portagentd=debug portagentd start
//! ```
//!
//! With no subcommand the agent starts in the foreground.

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::agent::PortAgent;
use crate::config::AgentConfig;
use crate::supervisor::{
    KillOutcome, PidFile, StartMode, Supervisor, SupervisorError, DEFAULT_KILL_GRACE,
};

/// Port agent - bridges an instrument connection to packet publishers
#[derive(Parser, Debug)]
#[command(name = "portagentd", version, about)]
pub struct Args {
    /// TOML configuration file (defaults to $PORT_AGENT_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the port agent
    Start {
        /// Run as a background daemon
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running port agent
    Stop,
    /// Show whether the port agent is running
    Status,
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` adds to the default `info` level for the agent's crates.
pub fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("portagentd=info".parse()?)
                .add_directive("portagent_core=info".parse()?)
                .add_directive("portagent_protocol=info".parse()?),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))
}

/// Runs the parsed command. Returns the process exit code.
pub fn run(args: Args) -> Result<i32> {
    init_logging()?;

    let mut config = AgentConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    let cwd = env::current_dir().context("Failed to read working directory")?;
    config.resolve_paths(&cwd);

    match args.command.unwrap_or(Command::Start { daemon: false }) {
        Command::Start { daemon } => start(&config, daemon),
        Command::Stop => stop(&config),
        Command::Status => status(&config),
    }
}

fn start(config: &AgentConfig, daemon: bool) -> Result<i32> {
    let mode = if daemon {
        StartMode::Daemon
    } else {
        StartMode::Foreground
    };

    let agent = PortAgent::from_config(config).context("Failed to build port agent")?;
    let supervisor = Supervisor::new(config.supervisor_options(mode), agent);

    match supervisor.start() {
        Ok(code) => Ok(code),
        Err(SupervisorError::DuplicateInstance { pid, .. }) => {
            eprintln!("Port agent is already running (PID {pid})");
            eprintln!("Use 'portagentd stop' to stop it first.");
            Ok(1)
        }
        Err(SupervisorError::NotConfigured) => {
            eprintln!("No data channel configured: set connection.data_host and data_port.");
            Ok(1)
        }
        Err(e) => Err(e).context("Port agent failed"),
    }
}

fn stop(config: &AgentConfig) -> Result<i32> {
    let pid_file = PidFile::new(&config.pid_file);
    let outcome = pid_file
        .kill(DEFAULT_KILL_GRACE)
        .context("Failed to stop port agent")?;

    match outcome {
        KillOutcome::NotRunning => {
            println!("Port agent is not running.");
            Ok(0)
        }
        KillOutcome::Stopped { pid } => {
            println!("Port agent stopped (PID {pid}).");
            Ok(0)
        }
        KillOutcome::StillRunning { pid } => {
            eprintln!(
                "Port agent (PID {pid}) did not stop within {} seconds.",
                DEFAULT_KILL_GRACE.as_secs()
            );
            Ok(1)
        }
    }
}

fn status(config: &AgentConfig) -> Result<i32> {
    let pid_file = PidFile::new(&config.pid_file);
    match pid_file
        .running_pid()
        .context("Failed to read PID file")?
    {
        Some(pid) => {
            println!("Port agent is running (PID {pid})");
            println!("PID file: {}", pid_file.path().display());
            Ok(0)
        }
        None => {
            println!("Port agent is not running.");
            Ok(1)
        }
    }
}
