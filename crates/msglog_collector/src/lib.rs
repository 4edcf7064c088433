//! # Message Logger Collector
//!
//! The receiving half of the message logger. A collector accepts
//! connections from producer processes, decodes their frames and appends
//! every log call to a [`LogStorage`](msglog_core::LogStorage).
//!
//! This crate provides:
//! - [`Collector`], the TCP listener and UDP socket
//! - [`CollectorControl`] for rolling segments and shutting down
//! - [`CollectorConfig`], loadable from a TOML file
//!
//! # Architecture
//!
//! Each TCP connection and the UDP socket run as separate tokio tasks. They
//! decode frames and pass them over a bounded channel to one storage
//! writer, so the log directory always has a single writer. On shutdown
//! every open connection is sent `logger/del` before it is closed.
//!
//! ## Usage
//!
//! ```no_run
//! use msglog_collector::{Collector, CollectorConfig};
//!
//! # async fn run() -> msglog_collector::CollectorResult<()> {
//! let config = CollectorConfig::load("/etc/msglog/collector.toml")?;
//! let collector = Collector::bind(config).await?;
//! let control = collector.control();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     control.shutdown();
//! });
//! collector.run().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collector;
mod config;
mod connection;
mod error;
mod writer;

pub use collector::{Collector, CollectorControl};
pub use config::{CollectorConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_TCP_ADDR};
pub use error::{CollectorError, CollectorResult};
pub use writer::WriterStats;
