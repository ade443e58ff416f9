//! Port Agent Protocol - Framing and report payloads
//!
//! This crate turns the raw bytes staged in a `RingBuffer` into packets and
//! defines the JSON payloads the daemon attaches to the status and fault
//! packets it generates itself.

pub mod error;
pub mod framing;
pub mod report;

pub use error::FramingError;
pub use framing::{Framer, Framing, DEFAULT_MAX_PACKET_SIZE};
pub use report::{ChannelStatus, FaultReport, StatusReport};
