//! Dual-channel connection for instruments behind a serial-to-network bridge.

use async_trait::async_trait;
use portagent_core::Channel;

use super::{
    Capabilities, ChannelCapability, ChannelRole, Connection, ConnectionType, TcpTransport,
    Transport,
};

/// Connection with separate data and command channels.
///
/// The bridge dials in to both ports, so the daemon listens on each. Both
/// channels are required: the connection only counts as connected once
/// the bridge has attached to data and command.
#[derive(Debug)]
pub struct InstrumentRsnConnection {
    data: TcpTransport,
    command: TcpTransport,
}

impl InstrumentRsnConnection {
    pub fn new() -> Self {
        Self {
            data: TcpTransport::listener(),
            command: TcpTransport::listener(),
        }
    }
}

impl Default for InstrumentRsnConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for InstrumentRsnConnection {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::InstrumentRsn
    }

    fn capabilities(&self) -> Capabilities {
        let listener = ChannelCapability {
            role: ChannelRole::Listener,
            required: true,
        };
        Capabilities {
            data: Some(listener),
            command: Some(listener),
        }
    }

    fn transport(&self, channel: Channel) -> Option<&dyn Transport> {
        match channel {
            Channel::Data => Some(&self.data),
            Channel::Command => Some(&self.command),
        }
    }

    fn transport_mut(&mut self, channel: Channel) -> Option<&mut dyn Transport> {
        match channel {
            Channel::Data => Some(&mut self.data),
            Channel::Command => Some(&mut self.command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> InstrumentRsnConnection {
        let mut connection = InstrumentRsnConnection::new();
        connection.set_data_host("127.0.0.1").unwrap();
        connection.set_data_port(0).unwrap();
        connection.set_command_host("127.0.0.1").unwrap();
        connection.set_command_port(0).unwrap();
        connection
    }

    #[test]
    fn test_both_channels_are_listeners() {
        let mut connection = InstrumentRsnConnection::new();
        for channel in Channel::ALL {
            let transport = connection.transport_mut(channel).unwrap();
            assert_eq!(transport.role(), ChannelRole::Listener);
        }
        assert!(connection.capabilities().requires(Channel::Command));
    }

    #[tokio::test]
    async fn test_initialize_binds_both_ports() {
        let mut connection = configured();
        connection.initialize_data_socket().await.unwrap();
        connection.initialize_command_socket().await.unwrap();

        assert!(connection.data_initialized());
        assert!(connection.command_initialized());
        assert!(!connection.connected());

        let data = connection.transport(Channel::Data).and_then(|t| t.local_addr());
        let command = connection
            .transport(Channel::Command)
            .and_then(|t| t.local_addr());
        assert!(data.is_some());
        assert!(command.is_some());
        assert_ne!(data, command);

        assert!(connection.disconnect().await);
        assert!(!connection.data_initialized());
        assert!(!connection.command_initialized());
    }
}
