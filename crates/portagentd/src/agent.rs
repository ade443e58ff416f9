//! The port agent service.
//!
//! Each poll walks the connection's channels:
//!
//! ```text
//! ┌────────────┐ try_read ┌────────────┐ Framer ┌──────────┐ publish ┌───────────────┐
//! │ Transport  │─────────▶│ RingBuffer │───────▶│  Packet  │────────▶│ PublisherList │
//! │ (channel)  │          │ (channel)  │        │          │         │               │
//! └────────────┘          └────────────┘        └──────────┘         └───────────────┘
//! ```
//!
//! Reads are bounded by the buffer's free space, so a fast instrument
//! backs up into its socket rather than growing memory. Connection state
//! changes are published as `Status` packets and transport errors as
//! `Fault` packets.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel failures are reported and retried on the next poll

use std::collections::HashMap;
use std::fmt::Display;

use async_trait::async_trait;
use portagent_core::{Channel, CoreError, Packet, RingBuffer};
use portagent_protocol::{FaultReport, Framer, FramingError, StatusReport};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, ConfigError};
use crate::connection::{self, Connection, ConnectionError};
use crate::publisher::{self, PublishError, PublishSummary, PublisherList};
use crate::supervisor::DaemonService;

/// Largest single read from a transport.
const READ_CHUNK_SIZE: usize = 4096;

/// Errors building or running the agent.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Invalid framing: {0}")]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Invalid buffer: {0}")]
    Buffer(#[from] CoreError),
}

/// Bridges one instrument connection to a set of publishers.
pub struct PortAgent {
    connection: Box<dyn Connection>,
    framer: Framer,
    data_buffer: RingBuffer,
    command_buffer: RingBuffer,
    publishers: PublisherList,
    scratch: Vec<u8>,

    /// Last status published, to detect changes
    last_status: Option<StatusReport>,

    /// Last fault published per channel, to avoid repeating it every retry
    last_fault: HashMap<Channel, String>,
}

impl PortAgent {
    pub fn new(
        connection: Box<dyn Connection>,
        framer: Framer,
        buffer_capacity: usize,
        publishers: PublisherList,
    ) -> Result<Self, AgentError> {
        Ok(Self {
            connection,
            framer,
            data_buffer: RingBuffer::with_capacity(buffer_capacity)?,
            command_buffer: RingBuffer::with_capacity(buffer_capacity)?,
            publishers,
            scratch: vec![0; READ_CHUNK_SIZE.min(buffer_capacity)],
            last_status: None,
            last_fault: HashMap::new(),
        })
    }

    /// Builds the agent described by `config`.
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;
        let connection = connection::from_config(&config.connection)?;
        let framer = Framer::new(&config.framing)?;
        let publishers = publisher::from_config(&config.publishers)?;
        Self::new(connection, framer, config.buffer_capacity, publishers)
    }

    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub fn connection_mut(&mut self) -> &mut dyn Connection {
        self.connection.as_mut()
    }

    pub fn buffer(&self, channel: Channel) -> &RingBuffer {
        match channel {
            Channel::Data => &self.data_buffer,
            Channel::Command => &self.command_buffer,
        }
    }

    pub fn publishers(&self) -> &PublisherList {
        &self.publishers
    }

    /// Most recently published status.
    pub fn last_status(&self) -> Option<&StatusReport> {
        self.last_status.as_ref()
    }

    /// Delivers a packet to every publisher.
    pub fn publish(&mut self, packet: &Packet) -> PublishSummary {
        let summary = self.publishers.publish(packet);
        if !summary.all_delivered() {
            debug!(
                packet_type = %packet.packet_type(),
                delivered = summary.delivered,
                failed = summary.failed,
                "Partial delivery"
            );
        }
        summary
    }

    // ------------------------------------------------------------------
    // Channel servicing
    // ------------------------------------------------------------------

    async fn service_channel(&mut self, channel: Channel) {
        if !self.connection.capabilities().supports(channel)
            || !self.connection.channel_configured(channel)
        {
            return;
        }

        if !self.connection.channel_initialized(channel) {
            if let Err(e) = self.connection.initialize_channel(channel).await {
                self.fault(channel, &e);
                return;
            }
        }

        if !self.connection.channel_connected(channel) {
            match self.connection.poll_connect(channel).await {
                Ok(true) => {
                    self.last_fault.remove(&channel);
                    // Announce the attach before any of its data
                    self.report_status();
                }
                Ok(false) => return,
                Err(e) => {
                    self.fault(channel, &e);
                    return;
                }
            }
        }

        self.drain_channel(channel);
        self.frame_channel(channel);
    }

    /// Moves available bytes from the transport into the channel buffer.
    fn drain_channel(&mut self, channel: Channel) {
        let Some(transport) = self.connection.transport_mut(channel) else {
            return;
        };
        let buffer = match channel {
            Channel::Data => &mut self.data_buffer,
            Channel::Command => &mut self.command_buffer,
        };

        let mut failure = None;
        loop {
            let room = buffer.available().min(self.scratch.len());
            let Some(chunk) = self.scratch.get_mut(..room).filter(|c| !c.is_empty()) else {
                break;
            };
            match transport.try_read(chunk) {
                Ok(0) => break,
                Ok(n) => {
                    buffer.write(chunk.get(..n).unwrap_or_default());
                }
                Err(e) => {
                    failure = Some(ConnectionError::Transport { channel, source: e });
                    break;
                }
            }
        }

        if let Some(e) = failure {
            self.fault(channel, &e);
        }
    }

    fn frame_channel(&mut self, channel: Channel) {
        let buffer = match channel {
            Channel::Data => &mut self.data_buffer,
            Channel::Command => &mut self.command_buffer,
        };
        let packets = self.framer.drain(buffer, channel.packet_type());
        for packet in &packets {
            self.publish(packet);
        }
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    fn fault(&mut self, channel: Channel, error: &dyn Display) {
        let message = error.to_string();
        if self.last_fault.get(&channel) == Some(&message) {
            return;
        }
        warn!(channel = %channel, error = %message, "Channel fault");

        match FaultReport::new(channel, message.clone()).to_packet() {
            Ok(packet) => {
                self.publish(&packet);
            }
            Err(e) => warn!(error = %e, "Failed to encode fault report"),
        }
        self.last_fault.insert(channel, message);
    }

    /// Publishes a status packet if the connection state changed.
    fn report_status(&mut self) {
        let status = self.connection.status_report();
        if self.last_status.as_ref() == Some(&status) {
            return;
        }
        info!(
            connection_type = %status.connection_type,
            connected = status.connected,
            data_connected = status.data.connected,
            command_connected = status.command.map(|c| c.connected),
            "Connection status changed"
        );

        match status.to_packet() {
            Ok(packet) => {
                self.publish(&packet);
            }
            Err(e) => warn!(error = %e, "Failed to encode status report"),
        }
        self.last_status = Some(status);
    }
}

#[async_trait]
impl DaemonService for PortAgent {
    type Error = AgentError;

    fn is_configured(&self) -> bool {
        self.connection.data_configured()
    }

    async fn initialize(&mut self) -> Result<(), AgentError> {
        let capabilities = self.connection.capabilities();
        info!(
            connection_type = %self.connection.connection_type(),
            publishers = self.publishers.len(),
            "Initializing port agent"
        );

        for channel in Channel::ALL {
            if !capabilities.supports(channel) {
                continue;
            }
            if !self.connection.channel_configured(channel) {
                if capabilities.requires(channel) {
                    warn!(channel = %channel, "Required channel is not configured");
                }
                continue;
            }
            if let Err(e) = self.connection.initialize_channel(channel).await {
                self.fault(channel, &e);
            }
        }

        self.report_status();
        Ok(())
    }

    async fn poll(&mut self) {
        for channel in Channel::ALL {
            self.service_channel(channel).await;
        }
        self.report_status();
    }

    async fn teardown(&mut self) {
        if !self.connection.disconnect().await {
            warn!("Connection did not close cleanly");
        }

        // Whatever is left over never saw its delimiter
        for channel in Channel::ALL {
            let pending = self.buffer(channel).len();
            if pending > 0 {
                debug!(channel = %channel, bytes = pending, "Discarding partial frame");
            }
        }

        self.report_status();
        self.publishers.flush_all();
    }
}
