//! Port Agent Core - Shared types for instrument bridging
//!
//! This crate provides the types shared between the framing layer
//! (portagent-protocol) and the daemon (portagentd):
//! - `ring_buffer` - fixed-capacity byte staging with a look-ahead cursor
//! - `packet` - framed packets and their closed category set
//! - `channel` - the data and command channels of an instrument link
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod channel;
pub mod error;
pub mod packet;
pub mod ring_buffer;

// Re-exports for convenience
pub use channel::Channel;
pub use error::{CoreError, CoreResult};
pub use packet::{Packet, PacketType};
pub use ring_buffer::RingBuffer;
