//! Per-connection and UDP receive loops.

use crate::error::CollectorResult;
use crate::writer::{WriterCommand, WriterHandle};
use msglog_core::LogTime;
use msglog_protocol::{FrameDecoder, LoggerMessage, ProtocolVersion, WatcherSet};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8192;
const MAX_DATAGRAM: usize = 65_536;

/// Turns one decoded message into a writer command. `from` is the address
/// the message arrived from.
pub(crate) async fn dispatch(writer: &WriterHandle, from: SocketAddr, message: LoggerMessage) -> CollectorResult<()> {
    let command = match message {
        LoggerMessage::Register(registration) => WriterCommand::Register {
            addr: from,
            registration,
        },
        LoggerMessage::Log(message) => WriterCommand::Log {
            addr: from,
            time: LogTime::now(),
            message,
        },
        LoggerMessage::AppId(assignment) => WriterCommand::AppId {
            addr: from,
            app_id: assignment.app_instance_id,
        },
        LoggerMessage::Delete(set) => match set.detached_address() {
            Some(addr) => WriterCommand::Detach(addr),
            None => {
                debug!(%from, "ignoring control message");
                return Ok(());
            }
        },
    };
    writer.send(command).await
}

/// Reads frames from one producer until it disconnects, sends something
/// undecodable, or the collector shuts down. On shutdown the producer is
/// told to drop this collector.
pub(crate) async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    writer: WriterHandle,
    version: ProtocolVersion,
    max_frame: usize,
    cancel: CancellationToken,
) {
    let mut decoder = FrameDecoder::with_max_frame(max_frame);
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => None,
            read = stream.read(&mut buf) => Some(read),
        };
        let Some(read) = read else {
            let del = LoggerMessage::Delete(WatcherSet::logger_delete()).to_frame(version);
            if let Err(e) = stream.write_all(&del).await {
                debug!(%peer, error = %e, "could not send logger/del");
            }
            let _ = stream.shutdown().await;
            break;
        };

        let n = match read {
            Ok(0) => {
                debug!(%peer, "producer disconnected");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(%peer, error = %e, "read failed");
                break;
            }
        };

        decoder.extend(&buf[..n]);
        if !drain_frames(&mut decoder, peer, &writer, version).await {
            break;
        }
    }

    if writer.send(WriterCommand::Detach(peer)).await.is_err() {
        debug!(%peer, "writer stopped before detach");
    }
}

/// Dispatches every complete frame. Returns `false` if the connection
/// should be dropped.
async fn drain_frames(
    decoder: &mut FrameDecoder,
    peer: SocketAddr,
    writer: &WriterHandle,
    version: ProtocolVersion,
) -> bool {
    loop {
        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return true,
            Err(e) => {
                warn!(%peer, error = %e, "dropping connection");
                return false;
            }
        };
        let message = match LoggerMessage::decode(&frame, version) {
            Ok(message) => message,
            Err(e) => {
                warn!(%peer, error = %e, "undecodable frame, dropping connection");
                return false;
            }
        };
        if dispatch(writer, peer, message).await.is_err() {
            return false;
        }
    }
}

/// Receives one message per datagram until cancelled.
pub(crate) async fn serve_udp(
    socket: UdpSocket,
    writer: WriterHandle,
    version: ProtocolVersion,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = tokio::select! {
            () = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let (n, from) = match received {
            Ok(received) => received,
            Err(e) => {
                // ICMP errors from earlier sends surface here; keep going
                debug!(error = %e, "UDP receive failed");
                continue;
            }
        };
        match LoggerMessage::decode(&buf[..n], version) {
            Ok(message) => {
                if dispatch(&writer, from, message).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(%from, error = %e, "ignoring undecodable datagram"),
        }
    }
}
