//! # Message Logger Forwarder
//!
//! Producer-side half of the message logger: every log call made by a
//! process is encoded once and pushed to each attached collector.
//!
//! This crate provides:
//! - [`Forwarder`], the per-process fan-out with rate suppression,
//!   registration and app id handshakes
//! - [`LoggerEndpoint`], the non-blocking connection to one collector with
//!   a bounded pending queue and a reconnect limit
//! - [`CollectorDirectory`] for locating collectors at startup
//! - [`MockNetwork`], an in-memory [`SocketFactory`] for tests
//!
//! ## Usage
//!
//! ```no_run
//! use msglog_forwarder::{Forwarder, ForwarderConfig, StaticDirectory};
//! use msglog_protocol::{MessageSource, Priority};
//! use std::time::Instant;
//!
//! let directory = StaticDirectory::default().with_collector("127.0.0.1:7500".parse().unwrap());
//! let forwarder = Forwarder::new(ForwarderConfig::new("cellapp"))
//!     .unwrap()
//!     .with_directory(directory);
//! forwarder.discover().unwrap();
//!
//! forwarder.log(
//!     Priority::Error,
//!     "",
//!     MessageSource::Cpp,
//!     "%s failed with code %d",
//!     &["flush".into(), 5.into()],
//!     None,
//! );
//! forwarder.service(Instant::now());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod discovery;
mod endpoint;
mod error;
mod forwarder;
mod mock;
mod socket;
mod suppression;

pub use config::{
    EndpointConfig, ForwarderConfig, DEFAULT_MAX_RECONNECTS, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_REGISTER_WRITE_DELAY,
};
pub use discovery::{CollectorDirectory, CollectorInfo, StaticDirectory};
pub use endpoint::{
    EndpointMode, EndpointState, EndpointStatus, LoggerEndpoint, RemovalReason, SendOutcome,
};
pub use error::{ForwarderError, ForwarderResult};
pub use forwarder::{Forwarder, LogDispatch, SPAM_INTERVAL, SPAM_SUMMARY_FORMAT};
pub use mock::{ConnectMode, MockNetwork};
pub use socket::{DatagramSocket, NetSocketFactory, SocketFactory, StreamSocket};
pub use suppression::{FormatHandler, SuppressionPatterns};
