//! # Message Logger Core
//!
//! Collector-side storage of log entries and the query engine that reads
//! them back.
//!
//! This crate provides:
//! - [`LogStorage`], the single writer of a log directory: per-user
//!   segments with size-based rotation, append-only registries and a
//!   pid lock
//! - [`LogReader`] and [`UserLogReader`], read-only views that can run
//!   next to a live collector
//! - [`Query`] and [`QueryRange`], filtered iteration in either direction
//!   with context lines
//!
//! ## Usage
//!
//! ```no_run
//! use msglog_core::{LogReader, LogStorage, QueryParams, StorageConfig};
//! use msglog_format::{Arg, FormatString};
//! use msglog_protocol::{ComponentRegistration, LogMessage, Priority};
//!
//! let mut storage = LogStorage::open(StorageConfig::new("/var/log/msglog"))?;
//! let fmt = FormatString::parse("%s failed with code %d")?;
//! let args = fmt.stream_args(&[Arg::from("flush"), Arg::from(5)])?;
//! storage.write_log(
//!     "10.0.0.5:40100".parse().unwrap(),
//!     &ComponentRegistration::new("cellapp", 1000, 4242),
//!     &LogMessage::new(Priority::Error, fmt.as_str(), args),
//! )?;
//!
//! let reader = LogReader::open("/var/log/msglog")?;
//! let log = reader.user_log(1000)?;
//! for item in reader.query(&log, &QueryParams::new())? {
//!     println!("{:?}", item?);
//! }
//! # Ok::<(), msglog_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod entry;
mod error;
pub mod query;
mod reader;
pub mod registry;
mod segment;
mod storage;
mod types;
mod user_log;

pub use config::{StorageConfig, DEFAULT_SEGMENT_SIZE, LOG_FORMAT_VERSION};
pub use dir::{read_active_files, username_for_uid, PidLock};
pub use entry::LogEntry;
pub use error::{CoreError, CoreResult};
pub use query::{Interpolation, Query, QueryItem, QueryParams, QueryRange, QueryResult};
pub use reader::LogReader;
pub use registry::{ComponentRecord, HostResolver, SystemResolver};
pub use segment::{list_suffixes, Segment};
pub use storage::LogStorage;
pub use types::{Direction, EntryAddress, LogTime};
pub use user_log::{UserLog, UserLogReader};
