//! Errors raised while configuring framing or encoding reports.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FramingError {
    #[error("Framing delimiter must not be empty")]
    EmptyDelimiter,

    #[error("Invalid max packet size: {size} (expected at least 1)")]
    InvalidPacketSize { size: usize },

    #[error("Failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}
