//! # Message Logger Protocol
//!
//! Wire messages exchanged between log producers and collectors.
//!
//! This crate provides:
//! - [`LoggerMessage`], the closed set of messages (register, log, app id,
//!   control)
//! - [`ProtocolVersion`] and the feature gates derived from it
//! - [`Priority`] and [`MessageSource`]
//! - length-prefixed framing ([`encode_frame`], [`FrameDecoder`])
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod message;
mod priority;
mod version;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME, FRAME_HEADER_SIZE};
pub use message::{
    AppIdAssignment, ComponentRegistration, LogMessage, LoggerMessage, MessageType, Metadata,
    WatcherSet, LOGGER_DELETE_PATH,
};
pub use priority::{MessageSource, Priority};
pub use version::{
    ProtocolVersion, STRING_LOGGER_ID_VERSION, STRING_METADATA_VERSION, WITHOUT_EXTRA_UDP_VERSION,
};
