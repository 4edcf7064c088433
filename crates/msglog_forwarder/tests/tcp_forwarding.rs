//! Forwarding over real loopback sockets.

use msglog_forwarder::{Forwarder, ForwarderConfig, LogDispatch, RemovalReason};
use msglog_protocol::{FrameDecoder, LoggerMessage, MessageSource, Priority, ProtocolVersion, WatcherSet};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the forwarder's reactor until `done` returns true.
fn pump_until(forwarder: &Forwarder, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out");
        forwarder.service(Instant::now());
        thread::sleep(Duration::from_millis(5));
    }
}

/// Decodes frames from the collector side of a connection on a thread.
fn spawn_reader(mut stream: TcpStream) -> mpsc::Receiver<LoggerMessage> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 1024];
        while let Ok(n) = stream.read(&mut buf) {
            if n == 0 {
                break;
            }
            decoder.extend(&buf[..n]);
            while let Ok(Some(frame)) = decoder.next_frame() {
                let msg = LoggerMessage::decode(&frame, ProtocolVersion::CURRENT).unwrap();
                if tx.send(msg).is_err() {
                    return;
                }
            }
        }
    });
    rx
}

fn accept(forwarder: &Forwarder, listener: &TcpListener) -> TcpStream {
    listener.set_nonblocking(true).unwrap();
    let mut accepted = None;
    pump_until(forwarder, || {
        if let Ok((stream, _)) = listener.accept() {
            accepted = Some(stream);
        }
        accepted.is_some()
    });
    let stream = accepted.unwrap();
    stream.set_nonblocking(false).unwrap();
    stream
}

#[test]
fn registration_and_messages_arrive_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let forwarder = Forwarder::new(ForwarderConfig::new("cellapp").with_pid(4242)).unwrap();
    forwarder.add_collector(addr, ProtocolVersion::CURRENT).unwrap();

    let stream = accept(&forwarder, &listener);
    let messages = spawn_reader(stream.try_clone().unwrap());

    let dispatch = forwarder.log(
        Priority::Error,
        "",
        MessageSource::Cpp,
        "%s failed with code %d",
        &["flush".into(), 5.into()],
        None,
    );
    assert_eq!(dispatch, LogDispatch::Forwarded(1));

    let mut received = Vec::new();
    pump_until(&forwarder, || {
        received.extend(messages.try_iter());
        received.len() >= 2
    });

    match &received[0] {
        LoggerMessage::Register(reg) => {
            assert_eq!(reg.component_name, "cellapp");
            assert_eq!(reg.pid, 4242);
        }
        other => panic!("expected registration, got {other:?}"),
    }
    match &received[1] {
        LoggerMessage::Log(log) => {
            assert_eq!(log.priority, Priority::Error);
            assert_eq!(log.format, "%s failed with code %d");
        }
        other => panic!("expected log, got {other:?}"),
    }
}

#[test]
fn collector_can_ask_to_be_removed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let forwarder = Forwarder::new(ForwarderConfig::new("baseapp")).unwrap();
    forwarder.add_collector(addr, ProtocolVersion::CURRENT).unwrap();

    let mut stream = accept(&forwarder, &listener);
    let del = LoggerMessage::Delete(WatcherSet::logger_delete()).to_frame(ProtocolVersion::CURRENT);
    stream.write_all(&del).unwrap();

    let mut removed = Vec::new();
    pump_until(&forwarder, || {
        removed.extend(forwarder.service(Instant::now()));
        !removed.is_empty()
    });
    assert_eq!(removed, vec![(addr, RemovalReason::RemoteDelete)]);
    assert!(forwarder.collectors().is_empty());
}
