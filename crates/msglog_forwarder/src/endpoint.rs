//! Transport endpoint: one producer's connection to one collector.
//!
//! An endpoint is a small state machine driven by [`LoggerEndpoint::service`]
//! on the thread that owns it. Other threads may call
//! [`LoggerEndpoint::send`] at any time; off the owning thread a send only
//! appends to the bounded pending queue and arms the register-write timer,
//! so socket I/O and interest changes stay on the owner.
//!
//! ```text
//! UNINITIALIZED -> CONNECTING -> WAITING <-> NEED_WRITE -> REGISTERED_WRITE
//!                      |                                        |
//!                      +---------- ERROR (absorbing) <----------+
//! ```

use crate::config::EndpointConfig;
use crate::socket::{DatagramSocket, SocketFactory, StreamSocket};
use bytes::{Bytes, BytesMut};
use msglog_protocol::{FrameDecoder, LoggerMessage, ProtocolVersion, WatcherSet, FRAME_HEADER_SIZE};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

const READ_CHUNK: usize = 4096;

/// Connection state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Created but not yet initialised.
    Uninitialized,
    /// A TCP connect is in progress.
    Connecting,
    /// Connected and idle; sends on the owning thread write directly.
    Waiting,
    /// Frames are queued but write interest is not registered yet.
    NeedWrite,
    /// Write interest is registered and queued frames are being flushed.
    RegisteredWrite,
    /// Permanently failed.
    Error,
}

impl EndpointState {
    /// Upper-case state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointState::Uninitialized => "UNINITIALIZED",
            EndpointState::Connecting => "CONNECTING",
            EndpointState::Waiting => "WAITING",
            EndpointState::NeedWrite => "NEED_WRITE",
            EndpointState::RegisteredWrite => "REGISTERED_WRITE",
            EndpointState::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for EndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport used by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    /// Length-prefixed frames over TCP.
    Tcp,
    /// One payload per datagram; no connection states.
    UdpOnly,
}

/// Result of handing a frame to an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the socket in full.
    Sent,
    /// Buffered for a later write.
    Queued,
    /// Dropped.
    Rejected,
}

impl SendOutcome {
    /// Whether the frame was sent or will be.
    pub fn is_accepted(self) -> bool {
        !matches!(self, SendOutcome::Rejected)
    }
}

/// Why an endpoint asks to be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The reconnect limit was reached.
    ConnectionFailed,
    /// The collector sent `logger/del`.
    RemoteDelete,
}

/// Result of one service turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    /// Still usable.
    Active,
    /// The owner should drop this endpoint.
    Removed(RemovalReason),
}

enum Note {
    Debug(String),
    Warn(String),
}

enum WriteProgress {
    Done,
    Pending,
    Failed(io::Error),
}

struct Inner {
    state: EndpointState,
    mode: EndpointMode,
    stream: Option<Box<dyn StreamSocket>>,
    udp: Option<Box<dyn DatagramSocket>>,
    queue_rx: mpsc::Receiver<Bytes>,
    in_flight: Option<(Bytes, usize)>,
    greeting: Vec<Bytes>,
    overflow_warned: bool,
    write_timer: Option<Instant>,
    attempts: u32,
    connect_deadline: Option<Instant>,
    decoder: FrameDecoder,
    dropped: usize,
    removal: Option<RemovalReason>,
    notes: Vec<Note>,
}

/// A connection to one collector.
pub struct LoggerEndpoint {
    addr: SocketAddr,
    version: ProtocolVersion,
    config: EndpointConfig,
    owner: ThreadId,
    factory: Arc<dyn SocketFactory>,
    queue_tx: mpsc::Sender<Bytes>,
    queued: AtomicUsize,
    inner: Mutex<Inner>,
}

impl LoggerEndpoint {
    /// Creates an endpoint owned by the calling thread.
    pub fn new(
        addr: SocketAddr,
        version: ProtocolVersion,
        config: EndpointConfig,
        factory: Arc<dyn SocketFactory>,
    ) -> Self {
        Self::with_owner(addr, version, config, factory, thread::current().id())
    }

    /// Creates an endpoint owned by `owner`.
    pub fn with_owner(
        addr: SocketAddr,
        version: ProtocolVersion,
        config: EndpointConfig,
        factory: Arc<dyn SocketFactory>,
        owner: ThreadId,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            addr,
            version,
            config,
            owner,
            factory,
            queue_tx,
            queued: AtomicUsize::new(0),
            inner: Mutex::new(Inner {
                state: EndpointState::Uninitialized,
                mode: EndpointMode::Tcp,
                stream: None,
                udp: None,
                queue_rx,
                in_flight: None,
                greeting: Vec::new(),
                overflow_warned: false,
                write_timer: None,
                attempts: 0,
                connect_deadline: None,
                decoder: FrameDecoder::new(),
                dropped: 0,
                removal: None,
                notes: Vec::new(),
            }),
        }
    }

    /// Collector address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Protocol version of the collector.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Current state.
    pub fn state(&self) -> EndpointState {
        self.inner.lock().state
    }

    /// Current transport.
    pub fn mode(&self) -> EndpointMode {
        self.inner.lock().mode
    }

    /// Frames waiting in the pending queue.
    pub fn pending(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Consecutive failed connection attempts so far.
    pub fn failed_attempts(&self) -> u32 {
        let inner = self.inner.lock();
        match inner.state {
            EndpointState::Connecting => inner.attempts.saturating_sub(1),
            EndpointState::Error => inner.attempts,
            _ => 0,
        }
    }

    /// Sets the frames written first on every new connection, normally the
    /// registration frame followed by the app id frame.
    pub fn set_greeting(&self, frames: Vec<Bytes>) {
        self.inner.lock().greeting = frames;
    }

    /// Opens the connection.
    ///
    /// If no TCP connection can be started at all the endpoint falls back to
    /// UDP-only mode. Returns `false` if neither transport is available.
    pub fn init(&self, now: Instant) -> bool {
        let ok = {
            let mut inner = self.inner.lock();
            self.init_locked(&mut inner, now)
        };
        self.flush_notes();
        ok
    }

    fn init_locked(&self, inner: &mut Inner, now: Instant) -> bool {
        if inner.state != EndpointState::Uninitialized {
            return inner.state != EndpointState::Error;
        }

        if self.open_stream(inner, now) {
            if self.version.should_open_udp() {
                let local = inner.stream.as_ref().and_then(|s| s.local_addr());
                self.open_udp(inner, local);
                inner.notes.push(Note::Debug(format!(
                    "collector version {} needs an extra UDP socket for detach notifications",
                    self.version
                )));
            }
            return true;
        }

        inner.attempts = 0;
        inner.mode = EndpointMode::UdpOnly;
        if !self.open_udp(inner, None) {
            inner.state = EndpointState::Error;
            return false;
        }
        inner.state = EndpointState::Waiting;
        let greeting = inner.greeting.clone();
        if let Some(udp) = inner.udp.as_mut() {
            for frame in &greeting {
                let _ = udp.send(frame.get(FRAME_HEADER_SIZE..).unwrap_or(&[]));
            }
        }
        inner.notes.push(Note::Debug("using UDP only".to_string()));
        true
    }

    /// Sends one length-prefixed frame.
    ///
    /// Never blocks. Off the owning thread, or while earlier frames are
    /// still pending, the frame is queued; a full queue drops it.
    pub fn send(&self, frame: Bytes) -> SendOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            self.send_locked(&mut inner, frame)
        };
        self.flush_notes();
        outcome
    }

    fn send_locked(&self, inner: &mut Inner, frame: Bytes) -> SendOutcome {
        if inner.removal.is_some() || inner.state == EndpointState::Error {
            return SendOutcome::Rejected;
        }

        if inner.mode == EndpointMode::UdpOnly {
            let payload = frame.get(FRAME_HEADER_SIZE..).unwrap_or(&[]);
            return match inner.udp.as_mut().map(|udp| udp.send(payload)) {
                Some(Ok(_)) => SendOutcome::Sent,
                _ => SendOutcome::Rejected,
            };
        }

        let on_owner = thread::current().id() == self.owner;
        if on_owner
            && inner.state == EndpointState::Waiting
            && inner.in_flight.is_none()
            && self.queued.load(Ordering::Acquire) == 0
        {
            return self.write_immediate(inner, frame);
        }
        self.enqueue(inner, frame)
    }

    fn write_immediate(&self, inner: &mut Inner, frame: Bytes) -> SendOutcome {
        let Some(stream) = inner.stream.as_mut() else {
            return self.enqueue(inner, frame);
        };
        match stream.write(&frame) {
            Ok(n) if n == frame.len() => SendOutcome::Sent,
            Ok(n) => {
                inner.in_flight = Some((frame, n));
                inner.state = EndpointState::RegisteredWrite;
                SendOutcome::Queued
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                inner.in_flight = Some((frame, 0));
                inner.state = EndpointState::RegisteredWrite;
                SendOutcome::Queued
            }
            Err(e) => {
                inner.notes.push(Note::Warn(format!("send failed: {e}")));
                inner.dropped += 1;
                self.reconnect(inner, Instant::now());
                SendOutcome::Rejected
            }
        }
    }

    fn enqueue(&self, inner: &mut Inner, frame: Bytes) -> SendOutcome {
        match self.queue_tx.try_send(frame) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::AcqRel);
                if inner.state == EndpointState::Waiting {
                    inner.state = EndpointState::NeedWrite;
                }
                if inner.write_timer.is_none() {
                    inner.write_timer = Some(Instant::now() + self.config.register_write_delay);
                }
                SendOutcome::Queued
            }
            Err(TrySendError::Full(_)) => {
                if !inner.overflow_warned {
                    inner.overflow_warned = true;
                    inner.notes.push(Note::Warn(format!(
                        "pending queue exceeds the maximum size {}; dropping frames",
                        self.config.queue_capacity
                    )));
                }
                SendOutcome::Rejected
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Rejected,
        }
    }

    /// Runs one reactor turn: completes connects, fires the register-write
    /// timer, flushes pending frames and reads control messages.
    ///
    /// Must be called on the owning thread.
    pub fn service(&self, now: Instant) -> EndpointStatus {
        let status = {
            let mut inner = self.inner.lock();
            self.service_locked(&mut inner, now)
        };
        self.flush_notes();
        status
    }

    fn service_locked(&self, inner: &mut Inner, now: Instant) -> EndpointStatus {
        if let Some(reason) = inner.removal {
            return EndpointStatus::Removed(reason);
        }

        if inner.mode == EndpointMode::Tcp {
            if inner.state == EndpointState::Connecting {
                self.poll_connect(inner, now);
            }

            if inner.write_timer.is_some_and(|deadline| now >= deadline) {
                inner.write_timer = None;
                if inner.state == EndpointState::NeedWrite {
                    inner.state = EndpointState::RegisteredWrite;
                }
            }

            if inner.state == EndpointState::RegisteredWrite {
                self.flush_pending(inner, now);
            }

            if matches!(
                inner.state,
                EndpointState::Waiting | EndpointState::NeedWrite | EndpointState::RegisteredWrite
            ) {
                self.read_stream(inner, now);
            }
        }

        if inner.removal.is_none() {
            self.read_datagrams(inner);
        }

        match inner.removal {
            Some(reason) => EndpointStatus::Removed(reason),
            None => EndpointStatus::Active,
        }
    }

    /// Tears the endpoint down: drops pending frames, closes the sockets
    /// and, when a UDP socket is open, tells the collector this component
    /// detached.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            self.teardown(&mut inner);
            if let Some(mut udp) = inner.udp.take() {
                if let Some(local) = udp.local_addr() {
                    let payload = LoggerMessage::Delete(WatcherSet::detach(local)).encode(self.version);
                    let _ = udp.send(&payload);
                }
            }
            inner.state = EndpointState::Error;
        }
        self.flush_notes();
    }

    fn open_stream(&self, inner: &mut Inner, now: Instant) -> bool {
        inner.stream = None;
        inner.state = EndpointState::Connecting;
        if inner.attempts >= self.config.max_reconnects {
            return false;
        }
        inner.attempts += 1;

        match self.factory.connect_stream(self.addr) {
            Ok(stream) => {
                inner.stream = Some(stream);
                inner.connect_deadline = Some(now + self.config.connect_timeout);
                true
            }
            Err(e) => {
                inner.notes.push(Note::Warn(format!("failed to connect: {e}")));
                false
            }
        }
    }

    fn open_udp(&self, inner: &mut Inner, local: Option<SocketAddr>) -> bool {
        match self.factory.open_datagram(self.addr, local) {
            Ok(udp) => {
                inner.udp = Some(udp);
                true
            }
            Err(e) => {
                inner.notes.push(Note::Warn(format!("failed to open UDP socket: {e}")));
                false
            }
        }
    }

    /// Closes the TCP socket and tries again until a connect starts or the
    /// attempt limit is reached.
    fn reconnect(&self, inner: &mut Inner, now: Instant) {
        if inner.in_flight.take().is_some() {
            inner.dropped += 1;
        }
        inner.decoder = FrameDecoder::new();

        while !self.open_stream(inner, now) {
            if inner.attempts >= self.config.max_reconnects {
                inner.notes.push(Note::Warn(format!(
                    "giving up after {} failed connection attempts",
                    inner.attempts
                )));
                inner.state = EndpointState::Error;
                inner.removal = Some(RemovalReason::ConnectionFailed);
                self.teardown(inner);
                return;
            }
        }
    }

    fn poll_connect(&self, inner: &mut Inner, now: Instant) {
        let Some(stream) = inner.stream.as_mut() else {
            self.reconnect(inner, now);
            return;
        };
        match stream.poll_connect() {
            Ok(true) => self.on_connected(inner),
            Ok(false) => {
                if inner.connect_deadline.is_some_and(|deadline| now >= deadline) {
                    inner.notes.push(Note::Warn("connect timed out".to_string()));
                    self.reconnect(inner, now);
                }
            }
            Err(e) => {
                inner.notes.push(Note::Warn(format!("connect failed: {e}")));
                self.reconnect(inner, now);
            }
        }
    }

    fn on_connected(&self, inner: &mut Inner) {
        inner.attempts = 0;
        inner.connect_deadline = None;
        if inner.dropped > 0 {
            inner.notes.push(Note::Warn(format!(
                "{} messages were dropped during the reconnect",
                inner.dropped
            )));
            inner.dropped = 0;
        }

        if !inner.greeting.is_empty() {
            let mut hello = BytesMut::new();
            for frame in &inner.greeting {
                hello.extend_from_slice(frame);
            }
            inner.in_flight = Some((hello.freeze(), 0));
        }

        inner.state = if inner.in_flight.is_some() || self.queued.load(Ordering::Acquire) > 0 {
            EndpointState::RegisteredWrite
        } else {
            EndpointState::Waiting
        };
        inner.notes.push(Note::Debug("connected".to_string()));
    }

    fn flush_pending(&self, inner: &mut Inner, now: Instant) {
        loop {
            if inner.in_flight.is_none() {
                match inner.queue_rx.try_recv() {
                    Ok(frame) => {
                        self.queued.fetch_sub(1, Ordering::AcqRel);
                        inner.in_flight = Some((frame, 0));
                    }
                    Err(_) => break,
                }
            }

            let progress = match (inner.in_flight.as_mut(), inner.stream.as_mut()) {
                (Some((frame, offset)), Some(stream)) => match stream.write(&frame[*offset..]) {
                    Ok(n) if n > 0 => {
                        *offset += n;
                        if *offset >= frame.len() {
                            WriteProgress::Done
                        } else {
                            WriteProgress::Pending
                        }
                    }
                    Ok(_) => WriteProgress::Pending,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => WriteProgress::Pending,
                    Err(e) => WriteProgress::Failed(e),
                },
                _ => return,
            };

            match progress {
                WriteProgress::Done => inner.in_flight = None,
                WriteProgress::Pending => return,
                WriteProgress::Failed(e) => {
                    inner.notes.push(Note::Warn(format!("send failed: {e}")));
                    self.reconnect(inner, now);
                    return;
                }
            }
        }

        inner.state = EndpointState::Waiting;
        inner.overflow_warned = false;
    }

    fn read_stream(&self, inner: &mut Inner, now: Instant) {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let Some(stream) = inner.stream.as_mut() else {
                return;
            };
            match stream.read(&mut buf) {
                Ok(0) => {
                    inner.notes.push(Note::Warn("connection closed by collector".to_string()));
                    self.reconnect(inner, now);
                    return;
                }
                Ok(n) => inner.decoder.extend(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    inner.notes.push(Note::Warn(format!("read failed: {e}")));
                    self.reconnect(inner, now);
                    return;
                }
            }
        }

        while inner.removal.is_none() {
            match inner.decoder.next_frame() {
                Ok(Some(payload)) => self.handle_control(inner, &payload),
                Ok(None) => break,
                Err(e) => {
                    inner.notes.push(Note::Warn(format!("discarding invalid frame: {e}")));
                    inner.decoder = FrameDecoder::new();
                    break;
                }
            }
        }
    }

    fn read_datagrams(&self, inner: &mut Inner) {
        let mut buf = [0u8; READ_CHUNK];
        while inner.removal.is_none() {
            let Some(udp) = inner.udp.as_mut() else {
                return;
            };
            match udp.recv(&mut buf) {
                Ok(n) => self.handle_control(inner, &buf[..n]),
                Err(_) => return,
            }
        }
    }

    fn handle_control(&self, inner: &mut Inner, payload: &[u8]) {
        match LoggerMessage::decode(payload, self.version) {
            Ok(LoggerMessage::Delete(set)) if set.is_logger_delete() => {
                inner.notes.push(Note::Debug("collector asked to be removed".to_string()));
                inner.removal = Some(RemovalReason::RemoteDelete);
                self.teardown(inner);
            }
            Ok(other) => inner.notes.push(Note::Warn(format!(
                "unexpected {:?} message from collector",
                other.message_type()
            ))),
            Err(e) => inner.notes.push(Note::Warn(format!("bad control message: {e}"))),
        }
    }

    fn teardown(&self, inner: &mut Inner) {
        while inner.queue_rx.try_recv().is_ok() {}
        self.queued.store(0, Ordering::Release);
        inner.in_flight = None;
        inner.write_timer = None;
        inner.connect_deadline = None;
        inner.stream = None;
    }

    fn flush_notes(&self) {
        let notes = std::mem::take(&mut self.inner.lock().notes);
        for note in notes {
            match note {
                Note::Debug(msg) => debug!(collector = %self.addr, "{msg}"),
                Note::Warn(msg) => warn!(collector = %self.addr, "{msg}"),
            }
        }
    }
}

impl std::fmt::Debug for LoggerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerEndpoint")
            .field("addr", &self.addr)
            .field("version", &self.version)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ConnectMode, MockNetwork};
    use msglog_protocol::{
        AppIdAssignment, ComponentRegistration, LogMessage, Priority,
    };
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn log_frame(text: &str) -> Bytes {
        LoggerMessage::Log(LogMessage::new(Priority::Info, text, Vec::new())).to_frame(ProtocolVersion::CURRENT)
    }

    fn registration() -> LoggerMessage {
        LoggerMessage::Register(ComponentRegistration::new("cellapp", 1000, 42))
    }

    fn endpoint(net: &MockNetwork, port: u16, config: EndpointConfig) -> LoggerEndpoint {
        let ep = LoggerEndpoint::new(addr(port), ProtocolVersion::CURRENT, config, Arc::new(net.clone()));
        ep.set_greeting(vec![registration().to_frame(ProtocolVersion::CURRENT)]);
        ep
    }

    fn formats(net: &MockNetwork, port: u16) -> Vec<String> {
        net.received(addr(port), ProtocolVersion::CURRENT)
            .into_iter()
            .map(|m| match m {
                LoggerMessage::Log(log) => log.format,
                LoggerMessage::Register(_) => "<register>".to_string(),
                other => format!("{:?}", other.message_type()),
            })
            .collect()
    }

    #[test]
    fn registration_precedes_messages() {
        let net = MockNetwork::new();
        let ep = endpoint(&net, 6000, EndpointConfig::default());
        assert!(ep.init(Instant::now()));
        assert_eq!(ep.state(), EndpointState::Connecting);

        assert_eq!(ep.send(log_frame("early")), SendOutcome::Queued);
        assert_eq!(ep.service(Instant::now()), EndpointStatus::Active);
        assert_eq!(ep.state(), EndpointState::Waiting);

        assert_eq!(ep.send(log_frame("direct")), SendOutcome::Sent);
        assert_eq!(formats(&net, 6000), vec!["<register>", "early", "direct"]);
    }

    #[test]
    fn off_thread_sends_wait_for_the_write_timer() {
        let net = MockNetwork::new();
        let ep = Arc::new(endpoint(&net, 6001, EndpointConfig::default()));
        ep.init(Instant::now());
        ep.service(Instant::now());
        assert_eq!(ep.state(), EndpointState::Waiting);

        let worker = Arc::clone(&ep);
        let outcome = thread::spawn(move || worker.send(log_frame("from worker")))
            .join()
            .unwrap();
        assert_eq!(outcome, SendOutcome::Queued);
        assert_eq!(ep.state(), EndpointState::NeedWrite);

        ep.service(Instant::now());
        assert_eq!(formats(&net, 6001), vec!["<register>"]);

        ep.service(Instant::now() + Duration::from_millis(600));
        assert_eq!(ep.state(), EndpointState::Waiting);
        assert_eq!(formats(&net, 6001), vec!["<register>", "from worker"]);
    }

    #[test]
    fn full_queue_drops_frames_until_drained() {
        let net = MockNetwork::new();
        net.set_write_limit(addr(6002), Some(0));
        let ep = endpoint(&net, 6002, EndpointConfig::default().with_queue_capacity(4));
        ep.init(Instant::now());
        ep.service(Instant::now());
        assert_eq!(ep.state(), EndpointState::RegisteredWrite);

        let outcomes: Vec<_> = (0..6).map(|i| ep.send(log_frame(&format!("m{i}")))).collect();
        assert_eq!(outcomes.iter().filter(|o| **o == SendOutcome::Queued).count(), 4);
        assert_eq!(outcomes.iter().filter(|o| **o == SendOutcome::Rejected).count(), 2);
        assert_eq!(ep.pending(), 4);

        net.set_write_limit(addr(6002), None);
        ep.service(Instant::now());
        assert_eq!(ep.pending(), 0);
        assert_eq!(ep.state(), EndpointState::Waiting);
        assert_eq!(formats(&net, 6002), vec!["<register>", "m0", "m1", "m2", "m3"]);
    }

    #[test]
    fn partial_writes_resume_where_they_stopped() {
        let net = MockNetwork::new();
        net.set_write_limit(addr(6003), Some(3));
        let ep = endpoint(&net, 6003, EndpointConfig::default());
        ep.init(Instant::now());
        for _ in 0..64 {
            ep.service(Instant::now());
        }
        ep.send(log_frame("after partial"));
        for _ in 0..64 {
            ep.service(Instant::now() + Duration::from_secs(1));
        }
        assert_eq!(formats(&net, 6003), vec!["<register>", "after partial"]);
    }

    #[test]
    fn gives_up_after_three_failed_connects() {
        let net = MockNetwork::new();
        net.set_connect_mode(addr(6004), ConnectMode::RefuseOnPoll);
        let ep = endpoint(&net, 6004, EndpointConfig::default());
        assert!(ep.init(Instant::now()));

        let mut status = EndpointStatus::Active;
        for _ in 0..10 {
            status = ep.service(Instant::now());
        }
        assert_eq!(status, EndpointStatus::Removed(RemovalReason::ConnectionFailed));
        assert_eq!(ep.state(), EndpointState::Error);
        assert_eq!(net.connect_attempts(addr(6004)), 3);
        assert_eq!(ep.send(log_frame("late")), SendOutcome::Rejected);
    }

    #[test]
    fn successful_connect_resets_the_counter() {
        let net = MockNetwork::new();
        net.set_connect_mode(addr(6005), ConnectMode::RefuseOnPoll);
        let ep = endpoint(&net, 6005, EndpointConfig::default());
        ep.init(Instant::now());
        ep.service(Instant::now());
        assert_eq!(ep.failed_attempts(), 1);

        net.set_connect_mode(addr(6005), ConnectMode::Accept);
        ep.service(Instant::now());
        assert_eq!(ep.state(), EndpointState::Waiting);
        assert_eq!(ep.failed_attempts(), 0);

        // a lost connection gets a fresh budget of attempts
        net.set_connect_mode(addr(6005), ConnectMode::RefuseOnPoll);
        net.close_remote(addr(6005));
        for _ in 0..10 {
            ep.service(Instant::now());
        }
        assert_eq!(net.connect_attempts(addr(6005)), 2 + 3);
        assert_eq!(ep.state(), EndpointState::Error);
    }

    #[test]
    fn reconnect_resends_registration() {
        let net = MockNetwork::new();
        let ep = endpoint(&net, 6006, EndpointConfig::default());
        ep.init(Instant::now());
        ep.service(Instant::now());
        ep.send(log_frame("first"));

        net.close_remote(addr(6006));
        ep.service(Instant::now());
        ep.service(Instant::now());
        ep.send(log_frame("second"));

        assert_eq!(net.connections(addr(6006)), 2);
        assert_eq!(formats(&net, 6006), vec!["<register>", "first", "<register>", "second"]);
    }

    #[test]
    fn logger_delete_removes_gracefully() {
        let net = MockNetwork::new();
        let ep = endpoint(&net, 6007, EndpointConfig::default());
        ep.init(Instant::now());
        ep.service(Instant::now());

        let del = LoggerMessage::Delete(WatcherSet::logger_delete()).to_frame(ProtocolVersion::CURRENT);
        net.push_inbound(addr(6007), &del);
        assert_eq!(
            ep.service(Instant::now()),
            EndpointStatus::Removed(RemovalReason::RemoteDelete)
        );
        assert_eq!(net.connect_attempts(addr(6007)), 1);
        assert_eq!(ep.send(log_frame("after delete")), SendOutcome::Rejected);
    }

    #[test]
    fn falls_back_to_udp_when_tcp_is_refused() {
        let net = MockNetwork::new();
        net.set_connect_mode(addr(6008), ConnectMode::RefuseImmediately);
        let ep = endpoint(&net, 6008, EndpointConfig::default());
        assert!(ep.init(Instant::now()));
        assert_eq!(ep.mode(), EndpointMode::UdpOnly);

        let app_id = LoggerMessage::AppId(AppIdAssignment { app_instance_id: 1 });
        assert_eq!(ep.send(app_id.to_frame(ProtocolVersion::CURRENT)), SendOutcome::Sent);

        let datagrams = net.datagrams(addr(6008));
        assert_eq!(datagrams.len(), 2);
        assert_eq!(
            LoggerMessage::decode(&datagrams[0], ProtocolVersion::CURRENT).unwrap(),
            registration()
        );
        assert_eq!(LoggerMessage::decode(&datagrams[1], ProtocolVersion::CURRENT).unwrap(), app_id);
    }

    #[test]
    fn no_transport_at_all_fails_init() {
        let net = MockNetwork::new();
        net.set_connect_mode(addr(6009), ConnectMode::RefuseImmediately);
        net.refuse_udp(addr(6009));
        let ep = endpoint(&net, 6009, EndpointConfig::default());
        assert!(!ep.init(Instant::now()));
        assert_eq!(ep.state(), EndpointState::Error);
    }

    #[test]
    fn old_collectors_get_a_detach_datagram() {
        let net = MockNetwork::new();
        let old = ProtocolVersion::new(2, 5);
        let ep = LoggerEndpoint::new(addr(6010), old, EndpointConfig::default(), Arc::new(net.clone()));
        ep.init(Instant::now());
        ep.service(Instant::now());
        ep.close();

        let datagrams = net.datagrams(addr(6010));
        assert_eq!(datagrams.len(), 1);
        match LoggerMessage::decode(&datagrams[0], old).unwrap() {
            LoggerMessage::Delete(set) => assert!(set.detached_address().is_some()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn write_failure_drops_the_frame_and_reconnects() {
        let net = MockNetwork::new();
        let ep = endpoint(&net, 6011, EndpointConfig::default());
        ep.init(Instant::now());
        ep.service(Instant::now());

        net.set_fail_writes(addr(6011), true);
        assert_eq!(ep.send(log_frame("lost")), SendOutcome::Rejected);
        assert_eq!(ep.state(), EndpointState::Connecting);

        net.set_fail_writes(addr(6011), false);
        ep.service(Instant::now());
        ep.send(log_frame("kept"));
        assert_eq!(formats(&net, 6011), vec!["<register>", "<register>", "kept"]);
    }
}
