//! Core error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur when constructing or parsing core types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Ring buffers must hold at least one byte
    #[error("Invalid ring buffer capacity: {capacity} (expected at least 1)")]
    InvalidCapacity { capacity: usize },

    /// Packet type name or code not in the closed set
    #[error("Unknown packet type: {value}")]
    UnknownPacketType { value: String },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
