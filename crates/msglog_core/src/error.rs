//! Error types for the collector-side log store.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by storage, registries and queries.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] msglog_storage::StorageError),

    /// Format string or argument stream error.
    #[error("format error: {0}")]
    Format(#[from] msglog_format::FormatError),

    /// Malformed wire data.
    #[error("protocol error: {0}")]
    Protocol(#[from] msglog_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process owns the log directory.
    ///
    /// `stale` is set when the recorded owner no longer runs; the lock
    /// file then has to be removed by hand.
    #[error("log directory locked by {}", lock_owner(.pid, .stale))]
    Locked {
        /// Pid recorded in the lock file, if readable.
        pid: Option<u32>,
        /// Whether the recorded pid is no longer running.
        stale: bool,
    },

    /// A segment file is inconsistent.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A registry file is inconsistent.
    #[error("registry corruption in {file}: {message}")]
    RegistryCorruption {
        /// Registry file name.
        file: String,
        /// Description of the corruption.
        message: String,
    },

    /// The on-disk format is newer than this build understands.
    #[error("unsupported log format version {found} (supported up to {supported})")]
    UnsupportedVersion {
        /// Version found in the `version` file.
        found: u32,
        /// Highest supported version.
        supported: u32,
    },

    /// Invalid log directory layout.
    #[error("invalid log directory: {message}")]
    InvalidFormat {
        /// Description of the problem.
        message: String,
    },

    /// A query named a segment that does not exist.
    #[error("unknown segment suffix: {suffix}")]
    UnknownSuffix {
        /// The requested suffix.
        suffix: String,
    },

    /// A query address lies outside the searched range.
    #[error("address out of range: {address}")]
    AddressOutOfRange {
        /// The offending address.
        address: String,
    },

    /// A query regular expression failed to compile.
    #[error("invalid regex {pattern:?}: {message}")]
    InvalidRegex {
        /// The pattern.
        pattern: String,
        /// Compiler message.
        message: String,
    },

    /// A query named a host the hostname registry does not know.
    #[error("unknown host: {host}")]
    UnknownHost {
        /// The host name or address.
        host: String,
    },

    /// No log exists for the user.
    #[error("no log for uid {uid}")]
    UnknownUser {
        /// The user id.
        uid: u16,
    },

    /// Invalid query parameters.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates a registry corruption error.
    pub fn registry_corruption(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RegistryCorruption {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an unknown suffix error.
    pub fn unknown_suffix(suffix: impl Into<String>) -> Self {
        Self::UnknownSuffix {
            suffix: suffix.into(),
        }
    }

    /// Creates an out-of-range address error.
    pub fn address_out_of_range(address: impl std::fmt::Display) -> Self {
        Self::AddressOutOfRange {
            address: address.to_string(),
        }
    }

    /// Creates an invalid regex error.
    pub fn invalid_regex(pattern: impl Into<String>, err: &regex::Error) -> Self {
        Self::InvalidRegex {
            pattern: pattern.into(),
            message: err.to_string(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }
}

fn lock_owner(pid: &Option<u32>, stale: &bool) -> String {
    let owner = match pid {
        Some(pid) => format!("pid {pid}"),
        None => "an unknown process".to_string(),
    };
    if *stale {
        format!("{owner} (stale lock)")
    } else {
        owner
    }
}
