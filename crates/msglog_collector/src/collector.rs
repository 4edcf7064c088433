//! The collector service.

use crate::config::CollectorConfig;
use crate::connection::{serve_connection, serve_udp};
use crate::error::{CollectorError, CollectorResult};
use crate::writer::{StorageWriter, WriterCommand, WriterHandle, WriterStats};
use msglog_core::LogStorage;
use std::net::SocketAddr;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A bound collector, ready to [`run`](Collector::run).
///
/// Binding opens and locks the log directory, so a second collector on
/// the same directory fails at [`Collector::bind`].
pub struct Collector {
    config: CollectorConfig,
    tcp: TcpListener,
    udp: Option<UdpSocket>,
    writer: StorageWriter,
    handle: WriterHandle,
    cancel: CancellationToken,
}

/// Controls a running collector from other tasks.
#[derive(Debug, Clone)]
pub struct CollectorControl {
    handle: WriterHandle,
    cancel: CancellationToken,
}

impl CollectorControl {
    /// Closes every active segment. The next entry for each user starts a
    /// new one.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Core`] if storage fails, or
    /// [`CollectorError::WriterStopped`] after shutdown.
    pub async fn roll(&self) -> CollectorResult<()> {
        self.handle.roll().await
    }

    /// Flushes every open segment file.
    ///
    /// # Errors
    ///
    /// Same as [`CollectorControl::roll`].
    pub async fn flush(&self) -> CollectorResult<()> {
        self.handle.flush().await
    }

    /// Asks the collector to stop. Open connections are sent `logger/del`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Collector {
    /// Opens the log directory and binds the sockets.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Core`] if the directory is locked or has
    /// an unsupported version, or [`CollectorError::Io`] if a socket
    /// cannot be bound.
    pub async fn bind(config: CollectorConfig) -> CollectorResult<Self> {
        let storage = LogStorage::open(config.storage.clone())?;
        let tcp = TcpListener::bind(config.tcp_addr).await?;
        let udp = match config.udp_addr {
            Some(addr) => Some(UdpSocket::bind(addr).await?),
            None => None,
        };
        let (writer, handle) = StorageWriter::new(storage, config.channel_capacity);

        info!(
            tcp = %tcp.local_addr()?,
            udp = ?udp.as_ref().and_then(|s| s.local_addr().ok()),
            logdir = %config.storage.logdir.display(),
            "collector bound"
        );
        Ok(Self {
            config,
            tcp,
            udp,
            writer,
            handle,
            cancel: CancellationToken::new(),
        })
    }

    /// Address of the TCP listener.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Io`] if the socket cannot report it.
    pub fn local_addr(&self) -> CollectorResult<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    /// Address of the UDP socket, if enabled.
    #[must_use]
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Returns a handle for controlling the collector once it runs.
    #[must_use]
    pub fn control(&self) -> CollectorControl {
        CollectorControl {
            handle: self.handle.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Serves producers until [`CollectorControl::shutdown`] is called.
    ///
    /// Returns once every connection has been closed and the storage has
    /// been flushed and released.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::WriterStopped`] if the storage writer
    /// panicked.
    pub async fn run(self) -> CollectorResult<WriterStats> {
        let Self {
            config,
            tcp,
            udp,
            writer,
            handle,
            cancel,
        } = self;

        let writer_task = tokio::task::spawn_blocking(move || writer.run());
        let mut tasks = JoinSet::new();
        if let Some(udp) = udp {
            tasks.spawn(serve_udp(udp, handle.clone(), config.version, cancel.clone()));
        }

        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = tcp.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "producer connected");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "could not disable Nagle");
                    }
                    tasks.spawn(serve_connection(
                        stream,
                        peer,
                        handle.clone(),
                        config.version,
                        config.max_frame,
                        cancel.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
            // reap finished connections
            while tasks.try_join_next().is_some() {}
        }

        info!(connections = tasks.len(), "collector shutting down");
        drop(tcp);
        while tasks.join_next().await.is_some() {}

        if handle.send(WriterCommand::Shutdown).await.is_err() {
            warn!("storage writer stopped early");
        }
        writer_task.await.map_err(|_| CollectorError::WriterStopped)
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("tcp", &self.tcp.local_addr().ok())
            .field("udp", &self.udp_addr())
            .field("logdir", &self.config.storage.logdir)
            .finish_non_exhaustive()
    }
}
