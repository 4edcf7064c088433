//! Error types for the format codec.

use thiserror::Error;

/// Result type for codec operations.
pub type FormatResult<T> = Result<T, FormatError>;

/// Errors that can occur while parsing format strings or streaming
/// their arguments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The format string could not be parsed.
    #[error("malformed format string at byte {position}: {reason}")]
    Malformed {
        /// Byte offset of the offending conversion.
        position: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// The number of arguments does not match the conversions.
    #[error("expected {expected} arguments, got {found}")]
    ArgumentCount {
        /// Values required by the format string (including `*` widths).
        expected: usize,
        /// Values supplied.
        found: usize,
    },

    /// An argument has the wrong type for its conversion.
    #[error("argument {index}: expected {expected}, got {found}")]
    ArgumentMismatch {
        /// Zero-based position in the argument list.
        index: usize,
        /// The kind of value the conversion requires.
        expected: &'static str,
        /// The kind of value that was supplied.
        found: &'static str,
    },

    /// The argument stream ended before every conversion was satisfied.
    #[error("argument stream truncated: needed {needed} bytes, {available} available")]
    TruncatedStream {
        /// Bytes the next value requires.
        needed: usize,
        /// Bytes left in the stream.
        available: usize,
    },

    /// A width or precision exceeds [`MAX_FIELD_WIDTH`](crate::MAX_FIELD_WIDTH).
    #[error("field width {value} exceeds limit {limit}")]
    FieldTooWide {
        /// The width or precision found.
        value: i64,
        /// The largest accepted magnitude.
        limit: usize,
    },

    /// A tagged value carried an unknown type tag.
    #[error("unknown argument tag {0:#04x}")]
    UnknownTag(u8),

    /// Writing to the output sink failed.
    #[error("output sink rejected formatted text")]
    Sink,
}

impl FormatError {
    /// Create a malformed format string error.
    pub fn malformed(position: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            position,
            reason: reason.into(),
        }
    }

    /// Create a truncated stream error.
    pub fn truncated(needed: usize, available: usize) -> Self {
        Self::TruncatedStream { needed, available }
    }
}

impl From<std::fmt::Error> for FormatError {
    fn from(_: std::fmt::Error) -> Self {
        Self::Sink
    }
}
