//! # Message Logger Storage
//!
//! Append-only byte stores used by the collector for segment files and
//! registries.
//!
//! Backends are **opaque byte stores** - they do not interpret the data
//! they hold. Entry layouts, argument blobs and registry records are all
//! owned by `msglog_core`.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush)
//! - A file may be written by one process while others read it, so
//!   read-only handles re-stat the file before trusting its length
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Example
//!
//! ```no_run
//! use msglog_storage::{FileBackend, StorageBackend};
//! use std::path::Path;
//!
//! let mut backend = FileBackend::open(Path::new("strings")).unwrap();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
