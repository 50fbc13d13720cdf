//! Protocol error types

use thiserror::Error;

/// Result alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while framing or (de)serializing protocol data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame body exceeds the maximum allowed size
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Claimed or actual size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Fewer bytes available than the frame claims
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    FrameTruncated {
        /// Bytes the frame requires
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Opcode byte is not part of the protocol
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// CBOR serialization failed
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("CBOR decode error: {0}")]
    CborDecode(String),
}
