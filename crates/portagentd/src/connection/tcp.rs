//! Single-channel connection: the daemon dials the instrument.

use async_trait::async_trait;
use portagent_core::Channel;

use super::{
    Capabilities, ChannelCapability, ChannelRole, Connection, ConnectionType, TcpTransport,
    Transport,
};

/// Connection to an instrument that serves its data stream on a TCP port.
///
/// There is no command channel: its setters fail with
/// `UnsupportedChannel` and `connected()` only looks at the data channel.
#[derive(Debug)]
pub struct InstrumentTcpConnection {
    data: TcpTransport,
}

impl InstrumentTcpConnection {
    pub fn new() -> Self {
        Self {
            data: TcpTransport::client(),
        }
    }
}

impl Default for InstrumentTcpConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for InstrumentTcpConnection {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::InstrumentTcp
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            data: Some(ChannelCapability {
                role: ChannelRole::Client,
                required: true,
            }),
            command: None,
        }
    }

    fn transport(&self, channel: Channel) -> Option<&dyn Transport> {
        match channel {
            Channel::Data => Some(&self.data),
            Channel::Command => None,
        }
    }

    fn transport_mut(&mut self, channel: Channel) -> Option<&mut dyn Transport> {
        match channel {
            Channel::Data => Some(&mut self.data),
            Channel::Command => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionError;

    #[test]
    fn test_command_channel_is_inert() {
        let mut connection = InstrumentTcpConnection::new();
        assert!(connection.command_connection_object().is_none());
        assert!(!connection.command_configured());
        assert!(matches!(
            connection.set_command_host("127.0.0.1"),
            Err(ConnectionError::UnsupportedChannel {
                channel: Channel::Command,
                ..
            })
        ));
        assert!(connection.set_command_port(4002).is_err());
    }

    #[test]
    fn test_data_channel_configuration() {
        let mut connection = InstrumentTcpConnection::new();
        assert!(!connection.data_configured());
        connection.set_data_host("127.0.0.1").unwrap();
        assert!(!connection.data_configured());
        connection.set_data_port(4001).unwrap();
        assert!(connection.data_configured());
        assert!(!connection.data_initialized());

        let transport = connection.data_connection_object().unwrap();
        assert_eq!(transport.role(), ChannelRole::Client);
        assert_eq!(transport.host(), Some("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_initialize_unconfigured_fails() {
        let mut connection = InstrumentTcpConnection::new();
        assert!(matches!(
            connection.initialize_data_socket().await,
            Err(ConnectionError::Transport {
                channel: Channel::Data,
                ..
            })
        ));
        assert!(matches!(
            connection.initialize_command_socket().await,
            Err(ConnectionError::UnsupportedChannel { .. })
        ));
    }
}
