//! Storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// On-disk format version written to the `version` file.
///
/// Version 3 widened `long` conversions in argument streams to 64 bits.
pub const LOG_FORMAT_VERSION: u32 = 3;

/// Default segment size before rotation: 100 MiB.
pub const DEFAULT_SEGMENT_SIZE: u64 = 100 * 1024 * 1024;

/// Configuration for opening a log directory for writing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root log directory.
    pub logdir: PathBuf,

    /// Maximum bytes of entries plus arguments per segment.
    pub segment_size: u64,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to flush segment files after every entry.
    pub flush_each_entry: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            logdir: PathBuf::from("logs"),
            segment_size: DEFAULT_SEGMENT_SIZE,
            create_if_missing: true,
            flush_each_entry: true,
        }
    }
}

impl StorageConfig {
    /// Creates a configuration for `logdir` with default values.
    #[must_use]
    pub fn new(logdir: impl Into<PathBuf>) -> Self {
        Self {
            logdir: logdir.into(),
            ..Self::default()
        }
    }

    /// Sets the segment rotation size in bytes.
    #[must_use]
    pub fn with_segment_size(mut self, bytes: u64) -> Self {
        self.segment_size = bytes.max(1);
        self
    }

    /// Sets whether a missing directory is created.
    #[must_use]
    pub fn with_create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether segment files are flushed after every entry.
    #[must_use]
    pub fn with_flush_each_entry(mut self, value: bool) -> Self {
        self.flush_each_entry = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = StorageConfig::new("/tmp/logs").with_segment_size(0).with_create_if_missing(false);
        assert_eq!(config.logdir, PathBuf::from("/tmp/logs"));
        assert_eq!(config.segment_size, 1);
        assert!(!config.create_if_missing);
        assert_eq!(StorageConfig::default().segment_size, DEFAULT_SEGMENT_SIZE);
    }
}
