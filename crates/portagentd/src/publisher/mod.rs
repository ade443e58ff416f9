//! Packet publishers.
//!
//! A publisher receives every framed packet and decides what to do with
//! each category. [`Publisher::publish`] dispatches on the packet type to
//! one of six handlers; each handler defaults to accepting and ignoring
//! the packet, so an implementation overrides only the categories it
//! cares about.
//!
//! [`PublisherList`] fans a packet out to every registered publisher. A
//! failing publisher is logged and counted but never prevents delivery to
//! the rest.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - I/O failures are returned as `PublishError`

mod log;
mod trace;

pub use self::log::LoggingPublisher;
pub use self::trace::TracingPublisher;

use std::fmt;
use std::path::PathBuf;

use portagent_core::{Packet, PacketType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::PublisherConfig;

/// Publisher variants, named as in `[[publishers]]` config entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherType {
    Log,
    Tracing,
}

impl PublisherType {
    pub const fn as_str(self) -> &'static str {
        match self {
            PublisherType::Log => "log",
            PublisherType::Tracing => "tracing",
        }
    }
}

impl fmt::Display for PublisherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from a publisher.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to open {path}: {error}")]
    Open { path: PathBuf, error: String },

    #[error("Failed to write {packet_type} packet to {target}: {error}")]
    Write {
        packet_type: PacketType,
        target: String,
        error: String,
    },

    #[error("Failed to flush {target}: {error}")]
    Flush { target: String, error: String },
}

// ============================================================================
// Publisher Trait
// ============================================================================

/// A sink for framed packets.
pub trait Publisher: Send {
    fn publisher_type(&self) -> PublisherType;

    /// Routes the packet to the handler for its type.
    fn publish(&mut self, packet: &Packet) -> Result<(), PublishError> {
        match packet.packet_type() {
            PacketType::InstrumentData => self.handle_instrument_data(packet),
            PacketType::DriverData => self.handle_driver_data(packet),
            PacketType::Command => self.handle_command(packet),
            PacketType::Status => self.handle_status(packet),
            PacketType::Fault => self.handle_fault(packet),
            PacketType::DriverCommand => self.handle_driver_command(packet),
        }
    }

    fn handle_instrument_data(&mut self, _packet: &Packet) -> Result<(), PublishError> {
        Ok(())
    }

    fn handle_driver_data(&mut self, _packet: &Packet) -> Result<(), PublishError> {
        Ok(())
    }

    fn handle_command(&mut self, _packet: &Packet) -> Result<(), PublishError> {
        Ok(())
    }

    fn handle_status(&mut self, _packet: &Packet) -> Result<(), PublishError> {
        Ok(())
    }

    fn handle_fault(&mut self, _packet: &Packet) -> Result<(), PublishError> {
        Ok(())
    }

    fn handle_driver_command(&mut self, _packet: &Packet) -> Result<(), PublishError> {
        Ok(())
    }

    /// Pushes buffered output to its destination.
    fn flush(&mut self) -> Result<(), PublishError> {
        Ok(())
    }
}

// ============================================================================
// Fan-out
// ============================================================================

/// Outcome of delivering one packet to every publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub delivered: usize,
    pub failed: usize,
}

impl PublishSummary {
    pub fn all_delivered(&self) -> bool {
        self.failed == 0
    }
}

/// Ordered set of publishers that each receive every packet.
#[derive(Default)]
pub struct PublisherList {
    publishers: Vec<Box<dyn Publisher>>,
}

impl PublisherList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, publisher: Box<dyn Publisher>) {
        self.publishers.push(publisher);
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    pub fn types(&self) -> Vec<PublisherType> {
        self.publishers.iter().map(|p| p.publisher_type()).collect()
    }

    /// Delivers `packet` to every publisher, in registration order.
    pub fn publish(&mut self, packet: &Packet) -> PublishSummary {
        let mut summary = PublishSummary::default();
        for publisher in &mut self.publishers {
            match publisher.publish(packet) {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    warn!(
                        publisher = %publisher.publisher_type(),
                        packet_type = %packet.packet_type(),
                        error = %e,
                        "Publisher rejected packet"
                    );
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Flushes every publisher, logging failures.
    pub fn flush_all(&mut self) -> PublishSummary {
        let mut summary = PublishSummary::default();
        for publisher in &mut self.publishers {
            match publisher.flush() {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    warn!(publisher = %publisher.publisher_type(), error = %e, "Flush failed");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

impl fmt::Debug for PublisherList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherList")
            .field("publishers", &self.types())
            .finish()
    }
}

impl FromIterator<Box<dyn Publisher>> for PublisherList {
    fn from_iter<I: IntoIterator<Item = Box<dyn Publisher>>>(iter: I) -> Self {
        Self {
            publishers: iter.into_iter().collect(),
        }
    }
}

/// Builds one publisher from its config entry.
pub fn new_publisher(config: &PublisherConfig) -> Result<Box<dyn Publisher>, PublishError> {
    match config {
        PublisherConfig::Log { path } => Ok(Box::new(LoggingPublisher::open(path)?)),
        PublisherConfig::Tracing => Ok(Box::new(TracingPublisher::new())),
    }
}

/// Builds the publisher list from `[[publishers]]` entries.
pub fn from_config(configs: &[PublisherConfig]) -> Result<PublisherList, PublishError> {
    configs.iter().map(new_publisher).collect()
}
