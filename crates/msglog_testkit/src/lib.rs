//! # Message Logger Testkit
//!
//! Test utilities for the message logger.
//!
//! This crate provides:
//! - Temporary log directories with producers to write from
//! - Property-based test generators using proptest
//! - A forwarder-to-collector pipeline over loopback sockets
//!
//! ## Usage
//!
//! ```rust,ignore
//! use msglog_testkit::prelude::*;
//! use msglog_protocol::Priority;
//!
//! #[test]
//! fn errors_are_found() {
//!     with_temp_log(|log| {
//!         let cellapp = Producer::new("cellapp", [10, 0, 0, 1], 1000, 100);
//!         log.write(1000, &cellapp, Priority::Error, "%s failed", &["flush".into()]);
//!         assert_eq!(log.messages(1000), vec!["flush failed"]);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
