//! Locating collectors at startup.

use crate::error::ForwarderResult;
use msglog_protocol::ProtocolVersion;
use std::net::SocketAddr;

/// A collector reachable from this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorInfo {
    /// Address of the collector's listener.
    pub addr: SocketAddr,
    /// Protocol version the collector speaks.
    pub version: ProtocolVersion,
}

impl CollectorInfo {
    /// Creates a collector description.
    pub fn new(addr: SocketAddr, version: ProtocolVersion) -> Self {
        Self { addr, version }
    }
}

/// Source of the collectors a forwarder should register with.
pub trait CollectorDirectory: Send + Sync {
    /// Returns every collector currently known.
    fn find_collectors(&self) -> ForwarderResult<Vec<CollectorInfo>>;
}

/// A fixed list of collectors, typically read from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    collectors: Vec<CollectorInfo>,
}

impl StaticDirectory {
    /// Creates a directory over `collectors`.
    pub fn new(collectors: Vec<CollectorInfo>) -> Self {
        Self { collectors }
    }

    /// Adds a collector speaking the current protocol version.
    pub fn with_collector(mut self, addr: SocketAddr) -> Self {
        self.collectors.push(CollectorInfo::new(addr, ProtocolVersion::CURRENT));
        self
    }
}

impl CollectorDirectory for StaticDirectory {
    fn find_collectors(&self) -> ForwarderResult<Vec<CollectorInfo>> {
        Ok(self.collectors.clone())
    }
}

impl<F> CollectorDirectory for F
where
    F: Fn() -> ForwarderResult<Vec<CollectorInfo>> + Send + Sync,
{
    fn find_collectors(&self) -> ForwarderResult<Vec<CollectorInfo>> {
        self()
    }
}
