//! Error types for the collector.

use msglog_core::CoreError;
use msglog_protocol::ProtocolError;
use std::io;
use thiserror::Error;

/// Result type for collector operations.
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Errors raised by the collector.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Storage failure.
    #[error("storage error: {0}")]
    Core(#[from] CoreError),

    /// Undecodable frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket or file error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The configuration file could not be used.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// The storage writer has stopped.
    #[error("storage writer is not running")]
    WriterStopped,
}

impl CollectorError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = CollectorError::config("missing [collector] table");
        assert_eq!(err.to_string(), "invalid configuration: missing [collector] table");
    }

    #[test]
    fn core_errors_convert() {
        let err: CollectorError = CoreError::UnknownUser { uid: 7 }.into();
        assert!(matches!(err, CollectorError::Core(_)));
    }
}
