//! Collector configuration.
//!
//! A configuration file looks like:
//!
//! ```toml
//! [collector]
//! tcp_addr = "0.0.0.0:6000"
//! udp_addr = "0.0.0.0:6001"
//!
//! [storage]
//! logdir = "/var/log/msglog"
//! segment_size_mb = 100
//! ```
//!
//! Every key is optional.

use crate::error::{CollectorError, CollectorResult};
use msglog_core::StorageConfig;
use msglog_protocol::{ProtocolVersion, DEFAULT_MAX_FRAME};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default TCP listen address.
pub const DEFAULT_TCP_ADDR: &str = "0.0.0.0:6000";

/// Default capacity of the channel feeding the storage writer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

const MIB: u64 = 1024 * 1024;

/// Configuration for a [`Collector`](crate::Collector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// TCP listen address.
    pub tcp_addr: SocketAddr,
    /// UDP address for producers without a TCP connection. `None` disables
    /// UDP.
    pub udp_addr: Option<SocketAddr>,
    /// Version this collector speaks; producers encode for it.
    pub version: ProtocolVersion,
    /// Largest frame accepted before a connection is dropped.
    pub max_frame: usize,
    /// Capacity of the channel feeding the storage writer.
    pub channel_capacity: usize,
    /// Log directory settings.
    pub storage: StorageConfig,
}

impl CollectorConfig {
    /// Creates a configuration writing to `logdir`.
    pub fn new(logdir: impl Into<PathBuf>) -> Self {
        Self {
            tcp_addr: SocketAddr::from(([0, 0, 0, 0], 6000)),
            udp_addr: None,
            version: ProtocolVersion::CURRENT,
            max_frame: DEFAULT_MAX_FRAME,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            storage: StorageConfig::new(logdir),
        }
    }

    /// Sets the TCP listen address.
    #[must_use]
    pub fn with_tcp_addr(mut self, addr: SocketAddr) -> Self {
        self.tcp_addr = addr;
        self
    }

    /// Enables UDP on `addr`.
    #[must_use]
    pub fn with_udp_addr(mut self, addr: SocketAddr) -> Self {
        self.udp_addr = Some(addr);
        self
    }

    /// Sets the protocol version.
    #[must_use]
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Sets the largest accepted frame.
    #[must_use]
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Sets the writer channel capacity.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Replaces the storage settings.
    #[must_use]
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Parses a TOML configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Config`] for malformed TOML or unknown keys.
    pub fn from_toml(text: &str) -> CollectorResult<Self> {
        let file: ConfigFile = toml::from_str(text).map_err(|e| CollectorError::config(e.to_string()))?;

        let mut config = Self::default();
        if let Some(addr) = file.collector.tcp_addr {
            config.tcp_addr = addr;
        }
        config.udp_addr = file.collector.udp_addr;
        if let Some(max_frame) = file.collector.max_frame {
            config.max_frame = max_frame;
        }
        if let Some(capacity) = file.collector.channel_capacity {
            config = config.with_channel_capacity(capacity);
        }

        if let Some(logdir) = file.storage.logdir {
            config.storage.logdir = logdir;
        }
        if let Some(mb) = file.storage.segment_size_mb {
            config.storage = config.storage.with_segment_size(mb.saturating_mul(MIB));
        }
        if let Some(flush) = file.storage.flush_each_entry {
            config.storage = config.storage.with_flush_each_entry(flush);
        }
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Io`] if the file cannot be read, or
    /// [`CollectorError::Config`] if it cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> CollectorResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::new(StorageConfig::default().logdir)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    collector: CollectorSection,
    storage: StorageSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CollectorSection {
    tcp_addr: Option<SocketAddr>,
    udp_addr: Option<SocketAddr>,
    max_frame: Option<usize>,
    channel_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StorageSection {
    logdir: Option<PathBuf>,
    segment_size_mb: Option<u64>,
    flush_each_entry: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CollectorConfig::default();
        assert_eq!(config.tcp_addr, DEFAULT_TCP_ADDR.parse().unwrap());
        assert_eq!(config.udp_addr, None);
        assert_eq!(config.version, ProtocolVersion::CURRENT);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn parses_file() {
        let config = CollectorConfig::from_toml(
            r#"
            [collector]
            tcp_addr = "127.0.0.1:7000"
            udp_addr = "127.0.0.1:7001"

            [storage]
            logdir = "/srv/logs"
            segment_size_mb = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.tcp_addr, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.udp_addr, Some("127.0.0.1:7001".parse().unwrap()));
        assert_eq!(config.storage.logdir, PathBuf::from("/srv/logs"));
        assert_eq!(config.storage.segment_size, 2 * MIB);
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(CollectorConfig::from_toml("").unwrap(), CollectorConfig::default());
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = CollectorConfig::from_toml("[collector]\nport = 6000\n").unwrap_err();
        assert!(matches!(err, CollectorError::Config { .. }));
    }

    #[test]
    fn builder() {
        let config = CollectorConfig::new("/tmp/logs")
            .with_tcp_addr("127.0.0.1:0".parse().unwrap())
            .with_udp_addr("127.0.0.1:0".parse().unwrap())
            .with_channel_capacity(0);
        assert_eq!(config.channel_capacity, 1);
        assert!(config.udp_addr.is_some());
    }
}
