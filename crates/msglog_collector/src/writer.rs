//! The storage writer: the only task that touches the log directory.

use crate::error::{CollectorError, CollectorResult};
use msglog_core::{CoreResult, LogStorage, LogTime};
use msglog_protocol::{ComponentRegistration, LogMessage};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Counters reported when the writer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Entries appended to storage.
    pub entries: u64,
    /// Log frames dropped: unregistered sender or rejected by storage.
    pub rejected: u64,
    /// Registrations received.
    pub registrations: u64,
}

#[derive(Debug)]
pub(crate) enum WriterCommand {
    Register {
        addr: SocketAddr,
        registration: ComponentRegistration,
    },
    Log {
        addr: SocketAddr,
        time: LogTime,
        message: LogMessage,
    },
    AppId {
        addr: SocketAddr,
        app_id: u32,
    },
    Detach(SocketAddr),
    Roll(oneshot::Sender<CoreResult<()>>),
    Flush(oneshot::Sender<CoreResult<()>>),
    Shutdown,
}

/// Sending side of the writer channel.
#[derive(Debug, Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::Sender<WriterCommand>,
}

impl WriterHandle {
    /// Queues a command, waiting while the channel is full.
    pub async fn send(&self, command: WriterCommand) -> CollectorResult<()> {
        self.tx.send(command).await.map_err(|_| CollectorError::WriterStopped)
    }

    pub async fn roll(&self) -> CollectorResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(WriterCommand::Roll(tx)).await?;
        rx.await.map_err(|_| CollectorError::WriterStopped)??;
        Ok(())
    }

    pub async fn flush(&self) -> CollectorResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(WriterCommand::Flush(tx)).await?;
        rx.await.map_err(|_| CollectorError::WriterStopped)??;
        Ok(())
    }
}

/// Owns the storage and applies commands in arrival order.
pub(crate) struct StorageWriter {
    storage: LogStorage,
    rx: mpsc::Receiver<WriterCommand>,
    registrations: HashMap<SocketAddr, ComponentRegistration>,
    stats: WriterStats,
}

impl StorageWriter {
    pub fn new(storage: LogStorage, capacity: usize) -> (Self, WriterHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        let writer = Self {
            storage,
            rx,
            registrations: HashMap::new(),
            stats: WriterStats::default(),
        };
        (writer, WriterHandle { tx })
    }

    /// Runs until [`WriterCommand::Shutdown`] or until every handle is
    /// dropped. Storage file I/O is blocking, so this runs on a blocking
    /// thread.
    pub fn run(mut self) -> WriterStats {
        debug!("storage writer started");
        while let Some(command) = self.rx.blocking_recv() {
            if !self.apply(command) {
                break;
            }
        }
        if let Err(e) = self.storage.flush() {
            warn!(error = %e, "final flush failed");
        }
        info!(
            entries = self.stats.entries,
            rejected = self.stats.rejected,
            "storage writer stopped"
        );
        self.stats
    }

    fn apply(&mut self, command: WriterCommand) -> bool {
        match command {
            WriterCommand::Register { addr, registration } => {
                debug!(%addr, name = %registration.component_name, pid = registration.pid, "component registered");
                self.storage.register_component(addr, &registration);
                self.registrations.insert(addr, registration);
                self.stats.registrations += 1;
            }
            WriterCommand::Log { addr, time, message } => {
                let Some(registration) = self.registrations.get(&addr) else {
                    warn!(%addr, "log message before registration");
                    self.stats.rejected += 1;
                    return true;
                };
                match self.storage.write_log_at(time, addr, registration, &message) {
                    Ok(_) => self.stats.entries += 1,
                    Err(e) => {
                        warn!(%addr, format = %message.format, error = %e, "dropping log message");
                        self.stats.rejected += 1;
                    }
                }
            }
            WriterCommand::AppId { addr, app_id } => {
                if let Err(e) = self.storage.set_app_id(addr, app_id) {
                    warn!(%addr, app_id, error = %e, "failed to record app id");
                }
            }
            WriterCommand::Detach(addr) => {
                self.registrations.remove(&addr);
                if self.storage.stop_logging_from_component(addr) {
                    debug!(%addr, "component detached");
                }
            }
            WriterCommand::Roll(reply) => {
                let _ = reply.send(self.storage.roll());
            }
            WriterCommand::Flush(reply) => {
                let _ = reply.send(self.storage.flush());
            }
            WriterCommand::Shutdown => return false,
        }
        true
    }
}
