//! In-memory network for exercising endpoints without real sockets.

use crate::socket::{DatagramSocket, SocketFactory, StreamSocket};
use msglog_protocol::{FrameDecoder, LoggerMessage, ProtocolVersion};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// How the mock answers TCP connects to an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectMode {
    /// Connects complete on the first poll.
    #[default]
    Accept,
    /// Connects stay in progress.
    Pending,
    /// The connect call itself fails.
    RefuseImmediately,
    /// The connect starts, then fails when polled.
    RefuseOnPoll,
}

#[derive(Debug, Default)]
struct Connection {
    written: Vec<u8>,
    inbound: VecDeque<u8>,
    remote_closed: bool,
}

#[derive(Debug, Default)]
struct Peer {
    mode: ConnectMode,
    udp_refused: bool,
    attempts: usize,
    connections: Vec<Connection>,
    write_limit: Option<usize>,
    fail_writes: bool,
    datagrams_out: Vec<Vec<u8>>,
    datagrams_in: VecDeque<Vec<u8>>,
}

/// A scripted network shared between a test and the endpoints under test.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    peers: Arc<Mutex<HashMap<SocketAddr, Peer>>>,
}

impl MockNetwork {
    /// Creates an empty network where every connect succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how connects to `addr` behave.
    pub fn set_connect_mode(&self, addr: SocketAddr, mode: ConnectMode) {
        self.peers.lock().entry(addr).or_default().mode = mode;
    }

    /// Makes UDP sockets to `addr` fail to open.
    pub fn refuse_udp(&self, addr: SocketAddr) {
        self.peers.lock().entry(addr).or_default().udp_refused = true;
    }

    /// Limits how many bytes each write accepts; `Some(0)` makes writes
    /// block.
    pub fn set_write_limit(&self, addr: SocketAddr, limit: Option<usize>) {
        self.peers.lock().entry(addr).or_default().write_limit = limit;
    }

    /// Makes writes to `addr` fail with a broken pipe.
    pub fn set_fail_writes(&self, addr: SocketAddr, fail: bool) {
        self.peers.lock().entry(addr).or_default().fail_writes = fail;
    }

    /// Number of TCP connects started to `addr`.
    pub fn connect_attempts(&self, addr: SocketAddr) -> usize {
        self.peers.lock().get(&addr).map_or(0, |p| p.attempts)
    }

    /// Number of TCP connections made to `addr`, open or not.
    pub fn connections(&self, addr: SocketAddr) -> usize {
        self.peers.lock().get(&addr).map_or(0, |p| p.connections.len())
    }

    /// Bytes written over the most recent connection to `addr`.
    pub fn written(&self, addr: SocketAddr) -> Vec<u8> {
        self.peers
            .lock()
            .get(&addr)
            .and_then(|p| p.connections.last())
            .map(|c| c.written.clone())
            .unwrap_or_default()
    }

    /// Decodes every complete frame written to `addr`, across connections.
    pub fn received(&self, addr: SocketAddr, version: ProtocolVersion) -> Vec<LoggerMessage> {
        let peers = self.peers.lock();
        let Some(peer) = peers.get(&addr) else {
            return Vec::new();
        };
        let mut messages = Vec::new();
        for conn in &peer.connections {
            let mut decoder = FrameDecoder::new();
            decoder.extend(&conn.written);
            while let Ok(Some(frame)) = decoder.next_frame() {
                if let Ok(msg) = LoggerMessage::decode(&frame, version) {
                    messages.push(msg);
                }
            }
        }
        messages
    }

    /// Queues bytes for the endpoint to read on its current connection.
    pub fn push_inbound(&self, addr: SocketAddr, bytes: &[u8]) {
        if let Some(conn) = self
            .peers
            .lock()
            .get_mut(&addr)
            .and_then(|p| p.connections.last_mut())
        {
            conn.inbound.extend(bytes);
        }
    }

    /// Closes the current connection from the collector side.
    pub fn close_remote(&self, addr: SocketAddr) {
        if let Some(conn) = self
            .peers
            .lock()
            .get_mut(&addr)
            .and_then(|p| p.connections.last_mut())
        {
            conn.remote_closed = true;
        }
    }

    /// Datagrams sent to `addr`.
    pub fn datagrams(&self, addr: SocketAddr) -> Vec<Vec<u8>> {
        self.peers
            .lock()
            .get(&addr)
            .map(|p| p.datagrams_out.clone())
            .unwrap_or_default()
    }

    /// Queues a datagram from `addr` for the endpoint's UDP socket.
    pub fn push_datagram(&self, addr: SocketAddr, bytes: &[u8]) {
        self.peers
            .lock()
            .entry(addr)
            .or_default()
            .datagrams_in
            .push_back(bytes.to_vec());
    }
}

impl SocketFactory for MockNetwork {
    fn connect_stream(&self, addr: SocketAddr) -> io::Result<Box<dyn StreamSocket>> {
        let mut peers = self.peers.lock();
        let peer = peers.entry(addr).or_default();
        peer.attempts += 1;
        if peer.mode == ConnectMode::RefuseImmediately {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        peer.connections.push(Connection::default());
        Ok(Box::new(MockStream {
            net: self.clone(),
            addr,
            index: peer.connections.len() - 1,
        }))
    }

    fn open_datagram(
        &self,
        addr: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<Box<dyn DatagramSocket>> {
        if self.peers.lock().entry(addr).or_default().udp_refused {
            return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "udp refused"));
        }
        Ok(Box::new(MockDatagram {
            net: self.clone(),
            addr,
            local: local.unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 40000))),
        }))
    }
}

struct MockStream {
    net: MockNetwork,
    addr: SocketAddr,
    index: usize,
}

impl MockStream {
    fn with<T>(&self, f: impl FnOnce(&mut Peer, usize) -> T) -> T {
        let mut peers = self.net.peers.lock();
        let peer = peers.entry(self.addr).or_default();
        f(peer, self.index)
    }
}

impl StreamSocket for MockStream {
    fn poll_connect(&mut self) -> io::Result<bool> {
        self.with(|peer, _| match peer.mode {
            ConnectMode::Accept => Ok(true),
            ConnectMode::Pending => Ok(false),
            ConnectMode::RefuseImmediately | ConnectMode::RefuseOnPoll => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "refused",
            )),
        })
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with(|peer, index| {
            if peer.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
            }
            let n = peer.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
            if n == 0 && !buf.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            peer.connections[index].written.extend_from_slice(&buf[..n]);
            Ok(n)
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.with(|peer, index| {
            let conn = &mut peer.connections[index];
            if conn.inbound.is_empty() {
                return if conn.remote_closed {
                    Ok(0)
                } else {
                    Err(io::ErrorKind::WouldBlock.into())
                };
            }
            let n = buf.len().min(conn.inbound.len());
            for (slot, byte) in buf.iter_mut().zip(conn.inbound.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], 40000 + self.index as u16)))
    }
}

struct MockDatagram {
    net: MockNetwork,
    addr: SocketAddr,
    local: SocketAddr,
}

impl DatagramSocket for MockDatagram {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.net
            .peers
            .lock()
            .entry(self.addr)
            .or_default()
            .datagrams_out
            .push(buf.to_vec());
        Ok(buf.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut peers = self.net.peers.lock();
        match peers.entry(self.addr).or_default().datagrams_in.pop_front() {
            Some(datagram) => {
                let n = buf.len().min(datagram.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msglog_protocol::{AppIdAssignment, LoggerMessage};

    #[test]
    fn written_frames_are_decodable() {
        let net = MockNetwork::new();
        let addr: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        let mut stream = net.connect_stream(addr).unwrap();
        assert!(stream.poll_connect().unwrap());

        let msg = LoggerMessage::AppId(AppIdAssignment { app_instance_id: 4 });
        stream.write(&msg.to_frame(ProtocolVersion::CURRENT)).unwrap();

        assert_eq!(net.received(addr, ProtocolVersion::CURRENT), vec![msg]);
        assert_eq!(net.connect_attempts(addr), 1);
    }

    #[test]
    fn write_limit_blocks() {
        let net = MockNetwork::new();
        let addr: SocketAddr = "127.0.0.1:7001".parse().unwrap();
        net.set_write_limit(addr, Some(0));
        let mut stream = net.connect_stream(addr).unwrap();
        let err = stream.write(b"abc").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn remote_close_reads_eof() {
        let net = MockNetwork::new();
        let addr: SocketAddr = "127.0.0.1:7002".parse().unwrap();
        let mut stream = net.connect_stream(addr).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);
        net.push_inbound(addr, b"hi");
        net.close_remote(addr);
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }
}
