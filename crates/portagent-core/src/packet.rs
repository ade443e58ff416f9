//! Framed packets and their categories.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ============================================================================
// Packet Type
// ============================================================================

/// Category carried by every packet.
///
/// The set is closed: publishers route on it and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    /// Raw bytes read from the instrument's data channel
    InstrumentData,
    /// Data produced by a driver
    DriverData,
    /// Bytes exchanged on the instrument's command channel
    Command,
    /// Port agent status report
    Status,
    /// Port agent fault report
    Fault,
    /// Command issued by a driver to the port agent
    DriverCommand,
}

impl PacketType {
    /// Every packet type, in code order.
    pub const ALL: [PacketType; 6] = [
        PacketType::InstrumentData,
        PacketType::DriverData,
        PacketType::Command,
        PacketType::Status,
        PacketType::Fault,
        PacketType::DriverCommand,
    ];

    /// Stable numeric code of this type.
    pub const fn code(self) -> u8 {
        match self {
            PacketType::InstrumentData => 1,
            PacketType::DriverData => 2,
            PacketType::Command => 3,
            PacketType::Status => 4,
            PacketType::Fault => 5,
            PacketType::DriverCommand => 6,
        }
    }

    /// Looks a packet type up by numeric code.
    pub fn from_code(code: u8) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or_else(|| CoreError::UnknownPacketType {
                value: code.to_string(),
            })
    }

    /// Wire name, as used in logs and configuration.
    pub const fn as_str(self) -> &'static str {
        match self {
            PacketType::InstrumentData => "instrument_data",
            PacketType::DriverData => "driver_data",
            PacketType::Command => "command",
            PacketType::Status => "status",
            PacketType::Fault => "fault",
            PacketType::DriverCommand => "driver_command",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PacketType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownPacketType {
                value: s.to_string(),
            })
    }
}

// ============================================================================
// Packet
// ============================================================================

/// A framed unit of data routed to publishers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    packet_type: PacketType,
    timestamp: DateTime<Utc>,
    payload: Vec<u8>,
}

impl Packet {
    /// Creates a packet stamped with the current time.
    pub fn new(packet_type: PacketType, payload: impl Into<Vec<u8>>) -> Self {
        Self::with_timestamp(packet_type, Utc::now(), payload)
    }

    /// Creates a packet with an explicit timestamp.
    pub fn with_timestamp(
        packet_type: PacketType,
        timestamp: DateTime<Utc>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            packet_type,
            timestamp,
            payload: payload.into(),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload rendered for text logs: printable ASCII as-is, everything
    /// else as `\xNN` (with `\r`, `\n`, `\t` and `\\` spelled out).
    pub fn escaped_payload(&self) -> String {
        let mut out = String::with_capacity(self.payload.len());
        for byte in &self.payload {
            match byte {
                b'\r' => out.push_str("\\r"),
                b'\n' => out.push_str("\\n"),
                b'\t' => out.push_str("\\t"),
                b'\\' => out.push_str("\\\\"),
                0x20..=0x7e => out.push(char::from(*byte)),
                other => out.push_str(&format!("\\x{other:02x}")),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_codes_round_trip() {
        for packet_type in PacketType::ALL {
            assert_eq!(PacketType::from_code(packet_type.code()), Ok(packet_type));
        }
        assert!(PacketType::from_code(0).is_err());
        assert!(PacketType::from_code(7).is_err());
    }

    #[test]
    fn test_names_parse() {
        assert_eq!("fault".parse::<PacketType>(), Ok(PacketType::Fault));
        assert_eq!(
            "driver_command".parse::<PacketType>(),
            Ok(PacketType::DriverCommand)
        );
        let err = "bogus".parse::<PacketType>().unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_display_uses_wire_names() {
        assert_eq!(PacketType::InstrumentData.to_string(), "instrument_data");
        assert_eq!(PacketType::Fault.to_string(), "fault");
    }

    #[test]
    fn test_packet_accessors() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let packet = Packet::with_timestamp(PacketType::Status, ts, b"ok".to_vec());
        assert_eq!(packet.packet_type(), PacketType::Status);
        assert_eq!(packet.timestamp(), ts);
        assert_eq!(packet.payload(), b"ok");
        assert_eq!(packet.len(), 2);
        assert!(!packet.is_empty());
    }

    #[test]
    fn test_escaped_payload() {
        let packet = Packet::new(PacketType::InstrumentData, b"T=12.5\r\n\x00\\".to_vec());
        assert_eq!(packet.escaped_payload(), "T=12.5\\r\\n\\x00\\\\");
    }
}
