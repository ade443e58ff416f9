//! Instrument connections.
//!
//! A connection groups the channels used to talk to one instrument. Every
//! variant has a data channel; some add a command channel. The
//! [`Connection`] trait exposes per-channel configuration and lifecycle
//! through provided methods built on two accessors, so a variant only
//! declares which transports it owns.
//!
//! | Variant | `type` | Data channel | Command channel |
//! |---------|--------|--------------|-----------------|
//! | [`InstrumentTcpConnection`] | `tcp` | client, required | none |
//! | [`InstrumentRsnConnection`] | `rsn` | listener, required | listener, required |
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Operations on a channel the variant lacks return
//!   `ConnectionError::UnsupportedChannel`

mod rsn;
mod tcp;
mod transport;

pub use rsn::InstrumentRsnConnection;
pub use tcp::InstrumentTcpConnection;
pub use transport::{
    ChannelRole, TcpTransport, Transport, TransportError, CONNECT_TIMEOUT, RECONNECT_DELAY,
};

use std::fmt;

use async_trait::async_trait;
use portagent_core::Channel;
use portagent_protocol::{ChannelStatus, StatusReport};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ConnectionConfig;

// ============================================================================
// Types
// ============================================================================

/// Connection variants, named as in the `[connection]` config section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    /// Single data channel; the daemon dials the instrument
    #[default]
    #[serde(rename = "tcp")]
    InstrumentTcp,

    /// Data and command channels; the instrument dials the daemon
    #[serde(rename = "rsn")]
    InstrumentRsn,
}

impl ConnectionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionType::InstrumentTcp => "tcp",
            ConnectionType::InstrumentRsn => "rsn",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a variant uses one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCapability {
    pub role: ChannelRole,

    /// Whether `connected()` waits on this channel
    pub required: bool,
}

/// Channel layout of a connection variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub data: Option<ChannelCapability>,
    pub command: Option<ChannelCapability>,
}

impl Capabilities {
    pub fn channel(&self, channel: Channel) -> Option<ChannelCapability> {
        match channel {
            Channel::Data => self.data,
            Channel::Command => self.command,
        }
    }

    pub fn supports(&self, channel: Channel) -> bool {
        self.channel(channel).is_some()
    }

    pub fn requires(&self, channel: Channel) -> bool {
        self.channel(channel).is_some_and(|c| c.required)
    }
}

/// Errors from connection operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("{connection_type} connection has no {channel} channel")]
    UnsupportedChannel {
        connection_type: ConnectionType,
        channel: Channel,
    },

    #[error("{channel} channel: {source}")]
    Transport {
        channel: Channel,
        #[source]
        source: TransportError,
    },
}

// ============================================================================
// Connection Trait
// ============================================================================

/// A connection to one instrument.
///
/// Implementors supply the variant's identity and per-channel transport
/// accessors; everything else is provided.
#[async_trait]
pub trait Connection: Send {
    fn connection_type(&self) -> ConnectionType;

    fn capabilities(&self) -> Capabilities;

    /// Transport behind `channel`, or `None` if the variant lacks it.
    fn transport(&self, channel: Channel) -> Option<&dyn Transport>;

    fn transport_mut(&mut self, channel: Channel) -> Option<&mut dyn Transport>;

    // ------------------------------------------------------------------
    // Connection objects
    // ------------------------------------------------------------------

    fn data_connection_object(&mut self) -> Option<&mut dyn Transport> {
        self.transport_mut(Channel::Data)
    }

    fn command_connection_object(&mut self) -> Option<&mut dyn Transport> {
        self.transport_mut(Channel::Command)
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    fn set_host(&mut self, channel: Channel, host: &str) -> Result<(), ConnectionError> {
        let connection_type = self.connection_type();
        self.transport_mut(channel)
            .ok_or(ConnectionError::UnsupportedChannel {
                connection_type,
                channel,
            })?
            .set_host(host)
            .map_err(|source| ConnectionError::Transport { channel, source })
    }

    fn set_port(&mut self, channel: Channel, port: u16) -> Result<(), ConnectionError> {
        let connection_type = self.connection_type();
        self.transport_mut(channel)
            .ok_or(ConnectionError::UnsupportedChannel {
                connection_type,
                channel,
            })?
            .set_port(port)
            .map_err(|source| ConnectionError::Transport { channel, source })
    }

    fn set_data_host(&mut self, host: &str) -> Result<(), ConnectionError> {
        self.set_host(Channel::Data, host)
    }

    fn set_data_port(&mut self, port: u16) -> Result<(), ConnectionError> {
        self.set_port(Channel::Data, port)
    }

    fn set_command_host(&mut self, host: &str) -> Result<(), ConnectionError> {
        self.set_host(Channel::Command, host)
    }

    fn set_command_port(&mut self, port: u16) -> Result<(), ConnectionError> {
        self.set_port(Channel::Command, port)
    }

    // ------------------------------------------------------------------
    // State predicates
    // ------------------------------------------------------------------

    fn channel_configured(&self, channel: Channel) -> bool {
        self.transport(channel).is_some_and(|t| t.is_configured())
    }

    fn channel_initialized(&self, channel: Channel) -> bool {
        self.transport(channel).is_some_and(|t| t.is_initialized())
    }

    fn channel_connected(&self, channel: Channel) -> bool {
        self.transport(channel).is_some_and(|t| t.is_connected())
    }

    fn data_configured(&self) -> bool {
        self.channel_configured(Channel::Data)
    }

    fn data_initialized(&self) -> bool {
        self.channel_initialized(Channel::Data)
    }

    fn data_connected(&self) -> bool {
        self.channel_connected(Channel::Data)
    }

    fn command_configured(&self) -> bool {
        self.channel_configured(Channel::Command)
    }

    fn command_initialized(&self) -> bool {
        self.channel_initialized(Channel::Command)
    }

    fn command_connected(&self) -> bool {
        self.channel_connected(Channel::Command)
    }

    /// True when every channel the variant requires is connected.
    fn connected(&self) -> bool {
        let capabilities = self.capabilities();
        let mut required = Channel::ALL
            .into_iter()
            .filter(|c| capabilities.requires(*c))
            .peekable();
        required.peek().is_some() && required.all(|c| self.channel_connected(c))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Resolves or binds one channel's endpoint.
    async fn initialize_channel(&mut self, channel: Channel) -> Result<(), ConnectionError> {
        let connection_type = self.connection_type();
        let transport =
            self.transport_mut(channel)
                .ok_or(ConnectionError::UnsupportedChannel {
                    connection_type,
                    channel,
                })?;
        transport
            .initialize()
            .await
            .map_err(|source| ConnectionError::Transport { channel, source })
    }

    async fn initialize_data_socket(&mut self) -> Result<(), ConnectionError> {
        self.initialize_channel(Channel::Data).await
    }

    async fn initialize_command_socket(&mut self) -> Result<(), ConnectionError> {
        self.initialize_channel(Channel::Command).await
    }

    /// Attempts to attach a peer on one channel without waiting for one.
    async fn poll_connect(&mut self, channel: Channel) -> Result<bool, ConnectionError> {
        let connection_type = self.connection_type();
        let transport =
            self.transport_mut(channel)
                .ok_or(ConnectionError::UnsupportedChannel {
                    connection_type,
                    channel,
                })?;
        transport
            .poll_connect()
            .await
            .map_err(|source| ConnectionError::Transport { channel, source })
    }

    /// Closes every channel. True only if each one closed cleanly.
    async fn disconnect(&mut self) -> bool {
        let mut clean = true;
        for channel in Channel::ALL {
            if let Some(transport) = self.transport_mut(channel) {
                let closed = transport.disconnect().await;
                debug!(channel = %channel, clean = closed, "Channel disconnected");
                clean &= closed;
            }
        }
        clean
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    fn channel_status(&self, channel: Channel) -> ChannelStatus {
        ChannelStatus {
            configured: self.channel_configured(channel),
            initialized: self.channel_initialized(channel),
            connected: self.channel_connected(channel),
        }
    }

    fn status_report(&self) -> StatusReport {
        StatusReport {
            connection_type: self.connection_type().to_string(),
            connected: self.connected(),
            data: self.channel_status(Channel::Data),
            command: self
                .capabilities()
                .supports(Channel::Command)
                .then(|| self.channel_status(Channel::Command)),
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Creates an unconfigured connection of the given variant.
pub fn new_connection(connection_type: ConnectionType) -> Box<dyn Connection> {
    match connection_type {
        ConnectionType::InstrumentTcp => Box::new(InstrumentTcpConnection::new()),
        ConnectionType::InstrumentRsn => Box::new(InstrumentRsnConnection::new()),
    }
}

/// Builds and configures a connection from its config section.
///
/// # Errors
///
/// Returns `ConnectionError::UnsupportedChannel` when the section sets
/// command endpoints for a variant without a command channel.
pub fn from_config(config: &ConnectionConfig) -> Result<Box<dyn Connection>, ConnectionError> {
    let mut connection = new_connection(config.connection_type);

    if let Some(host) = &config.data_host {
        connection.set_data_host(host)?;
    }
    if let Some(port) = config.data_port {
        connection.set_data_port(port)?;
    }
    if let Some(host) = &config.command_host {
        connection.set_command_host(host)?;
    }
    if let Some(port) = config.command_port {
        connection.set_command_port(port)?;
    }

    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_type_names() {
        assert_eq!(ConnectionType::InstrumentTcp.to_string(), "tcp");
        assert_eq!(ConnectionType::InstrumentRsn.to_string(), "rsn");
        assert_eq!(ConnectionType::default(), ConnectionType::InstrumentTcp);
    }

    #[test]
    fn test_factory_builds_variant() {
        for connection_type in [ConnectionType::InstrumentTcp, ConnectionType::InstrumentRsn] {
            let connection = new_connection(connection_type);
            assert_eq!(connection.connection_type(), connection_type);
            assert!(!connection.data_configured());
            assert!(!connection.connected());
        }
    }

    #[test]
    fn test_from_config_applies_endpoints() {
        let config = ConnectionConfig {
            connection_type: ConnectionType::InstrumentRsn,
            data_host: Some("127.0.0.1".to_string()),
            data_port: Some(4001),
            command_host: Some("127.0.0.1".to_string()),
            command_port: Some(4002),
        };
        let mut connection = from_config(&config).unwrap();
        assert!(connection.data_configured());
        assert!(connection.command_configured());
        assert_eq!(
            connection.command_connection_object().and_then(|t| t.port()),
            Some(4002)
        );
    }

    #[test]
    fn test_from_config_rejects_command_on_tcp() {
        let config = ConnectionConfig {
            connection_type: ConnectionType::InstrumentTcp,
            data_host: Some("127.0.0.1".to_string()),
            data_port: Some(4001),
            command_host: None,
            command_port: Some(4002),
        };
        let err = from_config(&config).err().unwrap();
        assert_eq!(
            err,
            ConnectionError::UnsupportedChannel {
                connection_type: ConnectionType::InstrumentTcp,
                channel: Channel::Command,
            }
        );
        assert_eq!(err.to_string(), "tcp connection has no command channel");
    }

    #[test]
    fn test_status_report_shape() {
        let mut connection = new_connection(ConnectionType::InstrumentRsn);
        connection.set_data_host("127.0.0.1").unwrap();
        connection.set_data_port(4001).unwrap();

        let report = connection.status_report();
        assert_eq!(report.connection_type, "rsn");
        assert!(!report.connected);
        assert!(report.data.configured);
        assert_eq!(report.command, Some(ChannelStatus::default()));

        let tcp = new_connection(ConnectionType::InstrumentTcp);
        assert_eq!(tcp.status_report().command, None);
    }
}
