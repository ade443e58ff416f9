//! Packet framing over a `RingBuffer`.
//!
//! Two modes are supported:
//!
//! - **raw**: whatever is buffered (up to `max_packet_size`) becomes one
//!   packet. Suited to binary instruments with no record separator.
//! - **delimited**: the buffer is scanned with the look-ahead cursor for a
//!   delimiter (e.g. `"\r\n"`). A frame is only consumed once the delimiter
//!   has arrived; the delimiter stays part of the payload.
//!
//! A delimited scan that reaches `max_packet_size`, or fills the whole
//! buffer, without finding a delimiter flushes what it has as one packet so a
//! noisy instrument cannot wedge the channel.

use portagent_core::{Packet, PacketType, RingBuffer};
use serde::{Deserialize, Serialize};

use crate::error::FramingError;

/// Default upper bound on a single packet's payload.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024;

fn default_max_packet_size() -> usize {
    DEFAULT_MAX_PACKET_SIZE
}

/// How buffered bytes are cut into packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Framing {
    Raw {
        #[serde(default = "default_max_packet_size")]
        max_packet_size: usize,
    },
    Delimited {
        delimiter: String,
        #[serde(default = "default_max_packet_size")]
        max_packet_size: usize,
    },
}

impl Default for Framing {
    fn default() -> Self {
        Framing::Raw {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl Framing {
    /// Checks the settings without building a framer.
    pub fn validate(&self) -> Result<(), FramingError> {
        let (delimiter, max_packet_size) = match self {
            Framing::Raw { max_packet_size } => (None, *max_packet_size),
            Framing::Delimited {
                delimiter,
                max_packet_size,
            } => (Some(delimiter), *max_packet_size),
        };

        if max_packet_size == 0 {
            return Err(FramingError::InvalidPacketSize {
                size: max_packet_size,
            });
        }
        if delimiter.is_some_and(|d| d.is_empty()) {
            return Err(FramingError::EmptyDelimiter);
        }
        Ok(())
    }

    pub fn max_packet_size(&self) -> usize {
        match self {
            Framing::Raw { max_packet_size } | Framing::Delimited { max_packet_size, .. } => {
                *max_packet_size
            }
        }
    }
}

/// Extracts packets from a ring buffer according to a `Framing`.
#[derive(Debug, Clone)]
pub struct Framer {
    /// Delimiter bytes; `None` in raw mode
    delimiter: Option<Vec<u8>>,

    max_packet_size: usize,
}

impl Framer {
    /// Creates a framer.
    ///
    /// # Errors
    ///
    /// - `FramingError::InvalidPacketSize` for a zero `max_packet_size`
    /// - `FramingError::EmptyDelimiter` for an empty delimiter
    pub fn new(framing: &Framing) -> Result<Self, FramingError> {
        framing.validate()?;

        let delimiter = match framing {
            Framing::Raw { .. } => None,
            Framing::Delimited { delimiter, .. } => Some(delimiter.as_bytes().to_vec()),
        };

        Ok(Self {
            delimiter,
            max_packet_size: framing.max_packet_size(),
        })
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Removes and returns the next complete frame, if one is buffered.
    pub fn next_frame(&self, buffer: &mut RingBuffer) -> Option<Vec<u8>> {
        match &self.delimiter {
            None => self.next_raw_frame(buffer),
            Some(delimiter) => self.next_delimited_frame(buffer, delimiter),
        }
    }

    /// Like [`Framer::next_frame`], wrapping the frame in a packet.
    pub fn next_packet(&self, buffer: &mut RingBuffer, packet_type: PacketType) -> Option<Packet> {
        self.next_frame(buffer)
            .map(|frame| Packet::new(packet_type, frame))
    }

    /// Extracts every complete packet currently buffered, in order.
    pub fn drain(&self, buffer: &mut RingBuffer, packet_type: PacketType) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Some(packet) = self.next_packet(buffer, packet_type) {
            packets.push(packet);
        }
        packets
    }

    fn next_raw_frame(&self, buffer: &mut RingBuffer) -> Option<Vec<u8>> {
        if buffer.is_empty() {
            return None;
        }
        Some(buffer.read_vec(self.max_packet_size))
    }

    fn next_delimited_frame(&self, buffer: &mut RingBuffer, delimiter: &[u8]) -> Option<Vec<u8>> {
        // read() never moves the peek cursor backwards, so always scan from
        // the first unread byte
        buffer.reset_peek();

        let mut frame = Vec::new();
        while let Some(byte) = buffer.peek_next_byte() {
            frame.push(byte);
            if frame.ends_with(delimiter) || frame.len() >= self.max_packet_size {
                buffer.discard(frame.len());
                return Some(frame);
            }
        }

        if buffer.is_full() && !frame.is_empty() {
            buffer.discard(frame.len());
            return Some(frame);
        }

        // Delimiter not here yet; rescan once more data arrives
        buffer.reset_peek();
        None
    }
}
