//! JSON payloads for the status and fault packets the agent emits.

use portagent_core::{Channel, Packet, PacketType};
use serde::{Deserialize, Serialize};

use crate::error::FramingError;

/// Lifecycle flags of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub configured: bool,
    pub initialized: bool,
    pub connected: bool,
}

/// Snapshot of the instrument connection, published on every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Connection variant name (e.g. "tcp", "rsn")
    pub connection_type: String,

    /// True when every required channel is connected
    pub connected: bool,

    pub data: ChannelStatus,

    /// Absent for connection types without a command channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<ChannelStatus>,
}

impl StatusReport {
    /// Encodes the report as a `Status` packet.
    pub fn to_packet(&self) -> Result<Packet, FramingError> {
        let payload = serde_json::to_vec(self)?;
        Ok(Packet::new(PacketType::Status, payload))
    }
}

/// A transport problem on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultReport {
    pub channel: Channel,
    pub message: String,
}

impl FaultReport {
    pub fn new(channel: Channel, message: impl Into<String>) -> Self {
        Self {
            channel,
            message: message.into(),
        }
    }

    /// Encodes the report as a `Fault` packet.
    pub fn to_packet(&self) -> Result<Packet, FramingError> {
        let payload = serde_json::to_vec(self)?;
        Ok(Packet::new(PacketType::Fault, payload))
    }
}
