//! Instrument-facing channels.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::packet::PacketType;

/// One logical transport path to the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Instrument data stream
    Data,
    /// Instrument command/response stream
    Command,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Data, Channel::Command];

    /// Category given to bytes framed from this channel.
    pub const fn packet_type(self) -> PacketType {
        match self {
            Channel::Data => PacketType::InstrumentData,
            Channel::Command => PacketType::Command,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Channel::Data => "data",
            Channel::Command => "command",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_packet_types() {
        assert_eq!(Channel::Data.packet_type(), PacketType::InstrumentData);
        assert_eq!(Channel::Command.packet_type(), PacketType::Command);
    }

    #[test]
    fn test_channel_display() {
        assert_eq!(Channel::Data.to_string(), "data");
        assert_eq!(Channel::Command.to_string(), "command");
    }
}
