//! Agent configuration.
//!
//! Loaded from a TOML file given with `--config` or the
//! `PORT_AGENT_CONFIG` environment variable. Every field has a default, so
//! an empty file is valid, though the agent will refuse to start until the
//! data channel endpoint is set.
//!
//! ```toml
//! pid_file = "/run/portagent/ctd.pid"
//! poll_interval_ms = 50
//!
//! [connection]
//! type = "tcp"
//! data_host = "10.0.0.5"
//! data_port = 4001
//!
//! [framing]
//! mode = "delimited"
//! delimiter = "\r\n"
//!
//! [[publishers]]
//! type = "log"
//! path = "/var/log/portagent/ctd.log"
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use portagent_protocol::Framing;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::ConnectionType;
use crate::supervisor::{StartMode, SupervisorOptions};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "PORT_AGENT_CONFIG";

pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Errors loading or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Directory holding the PID and log files by default.
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("portagent")
}

// ============================================================================
// Sections
// ============================================================================

/// The `[connection]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub data_host: Option<String>,
    pub data_port: Option<u16>,
    pub command_host: Option<String>,
    pub command_port: Option<u16>,
}

/// One `[[publishers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublisherConfig {
    /// Append packets to a text file
    Log { path: PathBuf },
    /// Emit packets as tracing events
    Tracing,
}

/// Complete agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub poll_interval_ms: u64,
    pub buffer_capacity: usize,
    pub connection: ConnectionConfig,
    pub framing: Framing,
    pub publishers: Vec<PublisherConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let dir = state_dir();
        Self {
            pid_file: dir.join("portagentd.pid"),
            log_file: dir.join("portagentd.log"),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            connection: ConnectionConfig::default(),
            framing: Framing::default(),
            publishers: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Parses and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        let config: AgentConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, else the file named by `PORT_AGENT_CONFIG`, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match env::var_os(CONFIG_ENV_VAR) {
            Some(value) if !value.is_empty() => Self::load(Path::new(&value)),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "buffer_capacity must be greater than zero".to_string(),
            ));
        }
        self.framing
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        for publisher in &self.publishers {
            if let PublisherConfig::Log { path } = publisher {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(
                        "log publisher requires a path".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Anchors relative file paths at `base`.
    ///
    /// Detaching changes the working directory to `/`, so this runs first.
    pub fn resolve_paths(&mut self, base: &Path) {
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        anchor(&mut self.pid_file);
        anchor(&mut self.log_file);
        for publisher in &mut self.publishers {
            if let PublisherConfig::Log { path } = publisher {
                anchor(path);
            }
        }
    }

    pub fn supervisor_options(&self, mode: StartMode) -> SupervisorOptions {
        SupervisorOptions {
            pid_file: self.pid_file.clone(),
            log_file: self.log_file.clone(),
            mode,
            poll_interval: self.poll_interval(),
        }
    }
}
