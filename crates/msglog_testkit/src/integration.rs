//! Cross-crate integration test helpers.
//!
//! [`Pipeline`] runs a collector on its own runtime and hands out
//! forwarders attached to it, so a test can drive the whole path from a
//! log call to a query.

use msglog_collector::{Collector, CollectorConfig, CollectorControl, CollectorResult, WriterStats};
use msglog_core::{LogReader, QueryItem, QueryParams, QueryResult};
use msglog_forwarder::{Forwarder, ForwarderConfig};
use msglog_protocol::ProtocolVersion;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

/// How long helpers wait for frames to arrive before giving up.
const PIPELINE_TIMEOUT: Duration = Duration::from_secs(5);

/// A collector listening on loopback, writing into a temporary directory.
pub struct Pipeline {
    runtime: Runtime,
    control: CollectorControl,
    addr: SocketAddr,
    task: Option<JoinHandle<CollectorResult<WriterStats>>>,
    _temp_dir: TempDir,
}

impl Pipeline {
    /// Starts a collector on an ephemeral TCP port.
    pub fn start() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("Failed to build runtime");

        let config = CollectorConfig::new(temp_dir.path())
            .with_tcp_addr(SocketAddr::from(([127, 0, 0, 1], 0)));
        let collector = runtime
            .block_on(Collector::bind(config))
            .expect("Failed to bind collector");
        let addr = collector.local_addr().expect("Collector has no address");
        let control = collector.control();
        let task = runtime.spawn(collector.run());

        Self {
            runtime,
            control,
            addr,
            task: Some(task),
            _temp_dir: temp_dir,
        }
    }

    /// The collector's TCP address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The log directory.
    pub fn path(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Creates a forwarder for `component` attached to this collector.
    ///
    /// The forwarder must be serviced from the calling thread, e.g. with
    /// [`Pipeline::pump`].
    pub fn forwarder(&self, component: &str, uid: u16, pid: u32) -> Forwarder {
        let config = ForwarderConfig::new(component).with_uid(uid).with_pid(pid);
        let forwarder = Forwarder::new(config).expect("Failed to create forwarder");
        forwarder
            .add_collector(self.addr, ProtocolVersion::CURRENT)
            .expect("Failed to attach collector");
        forwarder
    }

    /// Services `forwarder` until everything it queued has been written.
    pub fn pump(&self, forwarder: &Forwarder) {
        let deadline = Instant::now() + PIPELINE_TIMEOUT;
        loop {
            let removed = forwarder.service(Instant::now());
            assert!(removed.is_empty(), "Collector dropped: {removed:?}");
            if forwarder.pending() == 0 {
                return;
            }
            assert!(Instant::now() < deadline, "Timed out pumping forwarder");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Rolls the log.
    pub fn roll(&self) {
        self.runtime
            .block_on(self.control.roll())
            .expect("Failed to roll");
    }

    /// Waits until `uid` has at least `count` matches under `params`, then
    /// returns them.
    pub fn wait_for(&self, uid: u16, params: &QueryParams, count: usize) -> Vec<QueryResult> {
        let deadline = Instant::now() + PIPELINE_TIMEOUT;
        loop {
            self.runtime
                .block_on(self.control.flush())
                .expect("Failed to flush");
            let found = self.matches(uid, params);
            if found.len() >= count {
                return found;
            }
            assert!(
                Instant::now() < deadline,
                "Timed out waiting for {count} entries, have {}",
                found.len()
            );
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Current matches for `uid` under `params`; empty if the user has no
    /// log yet.
    pub fn matches(&self, uid: u16, params: &QueryParams) -> Vec<QueryResult> {
        let reader = LogReader::open(self.path()).expect("Failed to open reader");
        let Ok(log) = reader.user_log(uid) else {
            return Vec::new();
        };
        reader
            .query(&log, params)
            .expect("Failed to start query")
            .filter_map(|item| match item.expect("Query failed") {
                QueryItem::Match(result) => Some(result),
                _ => None,
            })
            .collect()
    }

    /// Stops the collector and returns its writer statistics.
    pub fn shutdown(mut self) -> WriterStats {
        self.control.shutdown();
        let task = self.task.take().expect("Collector already stopped");
        self.runtime
            .block_on(task)
            .expect("Collector task panicked")
            .expect("Collector failed")
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.control.shutdown();
            let _ = self.runtime.block_on(task);
        }
    }
}
