//! Test fixtures and log directory helpers.
//!
//! Provides temporary log directories that are written through
//! [`LogStorage`] directly, without a collector in between.

use msglog_core::{
    EntryAddress, HostResolver, LogReader, LogStorage, LogTime, QueryItem, QueryParams,
    StorageConfig,
};
use msglog_format::{Arg, FormatString};
use msglog_protocol::{ComponentRegistration, LogMessage, Priority};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use tempfile::TempDir;

/// Resolves every address to `host<last octet>` without touching the
/// system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedHosts;

impl HostResolver for FixedHosts {
    fn resolve(&self, addr: Ipv4Addr) -> Option<String> {
        Some(format!("host{}", addr.octets()[3]))
    }
}

/// A producing process: its address and registration.
#[derive(Debug, Clone)]
pub struct Producer {
    /// Address the producer logs from.
    pub addr: SocketAddr,
    /// Registration sent ahead of its messages.
    pub registration: ComponentRegistration,
}

impl Producer {
    /// Creates a producer on `ip`, with the port derived from `pid`.
    pub fn new(component: &str, ip: [u8; 4], uid: u16, pid: u32) -> Self {
        let port = 40_000 + (pid % 20_000) as u16;
        Self {
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(ip), port)),
            registration: ComponentRegistration::new(component, uid, pid),
        }
    }
}

/// A temporary log directory with automatic cleanup.
pub struct TestLog {
    /// The storage writing into the directory.
    pub storage: LogStorage,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestLog {
    /// Creates a log directory with the default segment size.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a log directory whose segments rotate after `bytes`.
    pub fn with_segment_size(bytes: u64) -> Self {
        Self::with_config(|config| config.with_segment_size(bytes))
    }

    fn with_config(adjust: impl FnOnce(StorageConfig) -> StorageConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = adjust(StorageConfig::new(temp_dir.path()));
        let storage = LogStorage::open(config)
            .expect("Failed to open log storage")
            .with_resolver(FixedHosts);
        Self {
            storage,
            _temp_dir: temp_dir,
        }
    }

    /// The log directory.
    pub fn path(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Writes one message at `secs` seconds past the epoch.
    pub fn write(
        &mut self,
        secs: i64,
        producer: &Producer,
        priority: Priority,
        format: &str,
        args: &[Arg],
    ) -> EntryAddress {
        let stream = FormatString::parse(format)
            .and_then(|f| f.stream_args(args))
            .expect("Invalid test message");
        let message = LogMessage::new(priority, format, stream);
        self.storage
            .write_log_at(LogTime::new(secs, 0), producer.addr, &producer.registration, &message)
            .expect("Failed to write entry")
    }

    /// Writes `count` INFO lines `line 0`, `line 1`, ... one second apart
    /// starting at `start`.
    pub fn write_lines(&mut self, producer: &Producer, start: i64, count: usize) -> Vec<EntryAddress> {
        (0..count)
            .map(|i| {
                self.write(
                    start + i as i64,
                    producer,
                    Priority::Info,
                    "line %d",
                    &[Arg::from(i)],
                )
            })
            .collect()
    }

    /// Opens a reader over the directory.
    pub fn reader(&mut self) -> LogReader {
        self.storage.flush().expect("Failed to flush");
        LogReader::open(self.path()).expect("Failed to open reader")
    }

    /// Messages of every match for `uid` under `params`.
    pub fn query_messages(&mut self, uid: u16, params: &QueryParams) -> Vec<String> {
        let reader = self.reader();
        let log = reader.user_log(uid).expect("Failed to open user log");
        reader
            .query(&log, params)
            .expect("Failed to start query")
            .filter_map(|item| match item.expect("Query failed") {
                QueryItem::Match(result) => Some(result.message),
                _ => None,
            })
            .collect()
    }

    /// Messages of every entry for `uid`, oldest first.
    pub fn messages(&mut self, uid: u16) -> Vec<String> {
        self.query_messages(uid, &QueryParams::new())
    }
}

impl Default for TestLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestLog {
    type Target = LogStorage;

    fn deref(&self) -> &Self::Target {
        &self.storage
    }
}

impl std::ops::DerefMut for TestLog {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.storage
    }
}

/// Runs a test with a temporary log directory.
///
/// # Example
///
/// ```rust,ignore
/// use msglog_testkit::with_temp_log;
///
/// #[test]
/// fn my_test() {
///     with_temp_log(|log| {
///         // ... write and query
///     });
/// }
/// ```
pub fn with_temp_log<F, R>(f: F) -> R
where
    F: FnOnce(&mut TestLog) -> R,
{
    let mut log = TestLog::new();
    f(&mut log)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// The producer used by the scenarios: `cellapp` on 10.0.0.1, uid 1000.
    pub fn cellapp() -> Producer {
        Producer::new("cellapp", [10, 0, 0, 1], 1000, 100)
    }

    /// A log holding `count` lines from [`cellapp`], spread over segments
    /// of roughly three entries each.
    pub fn multi_segment_log(count: usize) -> TestLog {
        let mut log = TestLog::with_segment_size(120);
        log.write_lines(&cellapp(), 1000, count);
        log
    }
}
