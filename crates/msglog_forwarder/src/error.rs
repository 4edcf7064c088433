//! Error types for the forwarder.

use thiserror::Error;

/// Result type for forwarder operations.
pub type ForwarderResult<T> = Result<T, ForwarderError>;

/// Errors raised while setting up log forwarding.
///
/// Log calls themselves never return these; they are contained inside the
/// forwarder and reported through `tracing`.
#[derive(Error, Debug)]
pub enum ForwarderError {
    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Collector discovery failed.
    #[error("collector discovery failed: {0}")]
    Discovery(String),

    /// A collector endpoint could not be initialised.
    #[error("cannot attach to collector {addr}: {reason}")]
    Attach {
        /// Collector address.
        addr: std::net::SocketAddr,
        /// Why it failed.
        reason: String,
    },

    /// Malformed wire data.
    #[error("protocol error: {0}")]
    Protocol(#[from] msglog_protocol::ProtocolError),
}

impl ForwarderError {
    /// Creates a discovery error.
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery(message.into())
    }

    /// Creates an attach error.
    pub fn attach(addr: std::net::SocketAddr, reason: impl Into<String>) -> Self {
        Self::Attach {
            addr,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let addr = "127.0.0.1:6000".parse().unwrap();
        let err = ForwarderError::attach(addr, "no TCP or UDP socket");
        assert_eq!(
            err.to_string(),
            "cannot attach to collector 127.0.0.1:6000: no TCP or UDP socket"
        );
        assert!(ForwarderError::discovery("timeout").to_string().contains("timeout"));
    }
}
