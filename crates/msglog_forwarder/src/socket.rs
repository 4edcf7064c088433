//! Socket abstraction used by endpoints.
//!
//! Endpoints never block: every call either makes progress or reports
//! [`std::io::ErrorKind::WouldBlock`]. The real implementation wraps
//! non-blocking `socket2` sockets; tests use [`crate::MockNetwork`].

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

/// A connection-oriented socket to a collector.
pub trait StreamSocket: Send {
    /// Checks whether a non-blocking connect has finished.
    ///
    /// Returns `Ok(true)` once connected and `Ok(false)` while in progress.
    fn poll_connect(&mut self) -> io::Result<bool>;

    /// Writes as much of `buf` as the socket accepts.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Reads available bytes; `Ok(0)` means the peer closed the connection.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Local address of the socket.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// A datagram socket connected to a collector.
pub trait DatagramSocket: Send {
    /// Sends one datagram.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Receives one datagram.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Local address of the socket.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Creates sockets for endpoints.
pub trait SocketFactory: Send + Sync {
    /// Starts a non-blocking TCP connect to `addr`.
    fn connect_stream(&self, addr: SocketAddr) -> io::Result<Box<dyn StreamSocket>>;

    /// Opens a UDP socket sending to `addr`.
    ///
    /// When `local` is given the socket binds to it, so the collector sees
    /// datagrams from the same address as the TCP connection.
    fn open_datagram(
        &self,
        addr: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<Box<dyn DatagramSocket>>;
}

/// Socket factory backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetSocketFactory;

struct NetStream {
    socket: Socket,
    connected: bool,
}

struct NetDatagram {
    socket: Socket,
}

fn connect_in_progress(err: &io::Error) -> bool {
    #[cfg(unix)]
    let in_progress = err.raw_os_error() == Some(libc::EINPROGRESS);
    #[cfg(not(unix))]
    let in_progress = false;
    in_progress || err.kind() == io::ErrorKind::WouldBlock
}

impl SocketFactory for NetSocketFactory {
    fn connect_stream(&self, addr: SocketAddr) -> io::Result<Box<dyn StreamSocket>> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;

        let connected = match socket.connect(&addr.into()) {
            Ok(()) => true,
            Err(e) if connect_in_progress(&e) => false,
            Err(e) => return Err(e),
        };
        Ok(Box::new(NetStream { socket, connected }))
    }

    fn open_datagram(
        &self,
        addr: SocketAddr,
        local: Option<SocketAddr>,
    ) -> io::Result<Box<dyn DatagramSocket>> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        let bind_to = local.unwrap_or(match addr {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        });
        socket.bind(&bind_to.into())?;
        socket.connect(&addr.into())?;
        Ok(Box::new(NetDatagram { socket }))
    }
}

fn std_addr(addr: io::Result<SockAddr>) -> Option<SocketAddr> {
    addr.ok().and_then(|a| a.as_socket())
}

impl StreamSocket for NetStream {
    fn poll_connect(&mut self) -> io::Result<bool> {
        if self.connected {
            return Ok(true);
        }
        if let Some(err) = self.socket.take_error()? {
            return Err(err);
        }
        match self.socket.peer_addr() {
            Ok(_) => {
                self.connected = true;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.write(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.read(buf)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        std_addr(self.socket.local_addr())
    }
}

impl DatagramSocket for NetDatagram {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.read(buf)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        std_addr(self.socket.local_addr())
    }
}
