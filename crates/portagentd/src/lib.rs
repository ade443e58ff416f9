//! Port agent daemon
//!
//! Connects to a remote instrument over TCP, frames the bytes it sends
//! into typed packets and hands every packet to a configurable set of
//! publishers. Runs as a supervised Unix daemon with a PID file and
//! signal-driven shutdown.
//!
//! - `connection` - Instrument connection variants and their TCP transports
//! - `publisher` - Packet sinks and fan-out
//! - `agent` - The poll-driven service tying connection, buffers and publishers together
//! - `supervisor` - PID file, signal trapping, detaching and the execution loop
//! - `config` - TOML configuration
//! - `cli` - Command-line entry point
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       portagentd                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐  poll()   ┌─────────────────────────┐  │
//! │  │   Supervisor    │──────────▶│        PortAgent        │  │
//! │  │ (pid, signals)  │           │                         │  │
//! │  └─────────────────┘           └────────────┬────────────┘  │
//! │                                             │               │
//! │                    ┌────────────────────────┼─────────┐     │
//! │                    ▼                        ▼         ▼     │
//! │  ┌─────────────────────────┐  ┌────────────┐  ┌──────────┐  │
//! │  │ Connection (tcp | rsn)  │  │ RingBuffer │  │Publisher │  │
//! │  │  data / command channel │  │ + Framer   │  │  List    │  │
//! │  └─────────────────────────┘  └────────────┘  └──────────┘  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate is panic-free:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Transport and publisher failures are logged and do not stop the loop

pub mod agent;
pub mod cli;
pub mod config;
pub mod connection;
pub mod publisher;
pub mod supervisor;

pub use agent::{AgentError, PortAgent};
pub use config::{AgentConfig, ConfigError};
