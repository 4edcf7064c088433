//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding logger messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A payload ended before a field could be read.
    #[error("message truncated: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the next field requires.
        needed: usize,
        /// Bytes left in the payload.
        available: usize,
    },

    /// The message type tag is not known.
    #[error("unknown message type {0}")]
    UnknownMessageType(i32),

    /// The priority byte is out of range.
    #[error("invalid priority {0}")]
    InvalidPriority(u8),

    /// The message source byte is out of range.
    #[error("invalid message source {0}")]
    InvalidSource(u8),

    /// The metadata block is malformed.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// A frame header announced a size above the limit.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Announced size.
        size: i64,
        /// Configured maximum.
        max: usize,
    },

    /// Format codec failure while reading an embedded value.
    #[error("format codec error: {0}")]
    Format(#[from] msglog_format::FormatError),
}

impl ProtocolError {
    /// Create an invalid metadata error.
    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::InvalidMetadata(message.into())
    }
}
