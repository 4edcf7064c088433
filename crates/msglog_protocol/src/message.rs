//! Logger messages.
//!
//! Every payload starts with an `i32` message-type tag. Multi-byte fields are
//! little-endian and strings are `u32` length-prefixed UTF-8.

use crate::error::{ProtocolError, ProtocolResult};
use crate::priority::{MessageSource, Priority};
use crate::version::ProtocolVersion;
use bytes::{Buf, BufMut, Bytes};
use msglog_format::{get_str, put_str, Arg, FormatError};
use serde::{Deserialize, Serialize};

/// Path of the control message that tells a producer to drop its endpoint.
pub const LOGGER_DELETE_PATH: &str = "logger/del";

/// Message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MessageType {
    /// Component registration.
    Register = 1,
    /// A log call.
    Log = 2,
    /// App instance id assignment.
    AppId = 3,
    /// Watcher-style SET, used for control messages.
    WatcherSet = 4,
}

impl TryFrom<i32> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Register),
            2 => Ok(MessageType::Log),
            3 => Ok(MessageType::AppId),
            4 => Ok(MessageType::WatcherSet),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// One-time registration sent by a producer before any log frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentRegistration {
    /// Protocol version of the producer.
    pub version: ProtocolVersion,
    /// Identifies which logger group the producer belongs to.
    pub logger_id: String,
    /// OS user id of the producing process.
    pub uid: u16,
    /// Process id.
    pub pid: u32,
    /// Component name, e.g. `cellapp`.
    pub component_name: String,
}

impl ComponentRegistration {
    /// Creates a registration at the current protocol version.
    pub fn new(component_name: impl Into<String>, uid: u16, pid: u32) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            logger_id: String::new(),
            uid,
            pid,
            component_name: component_name.into(),
        }
    }

    /// Sets the logger id.
    #[must_use]
    pub fn with_logger_id(mut self, logger_id: impl Into<String>) -> Self {
        self.logger_id = logger_id.into();
        self
    }

    /// Sets the protocol version the producer claims.
    #[must_use]
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }
}

/// Structured data attached to a single log entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Metadata {
    /// No metadata.
    #[default]
    None,
    /// A JSON document.
    Json(String),
    /// Key/value pairs streamed as tagged arguments.
    Fields(Vec<(String, Arg)>),
}

const METADATA_NONE: u8 = 0;
const METADATA_JSON: u8 = 1;
const METADATA_FIELDS: u8 = 2;

impl Metadata {
    /// Whether there is nothing attached.
    #[must_use]
    pub fn is_none(&self) -> bool {
        match self {
            Metadata::None => true,
            Metadata::Json(s) => s.is_empty(),
            Metadata::Fields(f) => f.is_empty(),
        }
    }

    /// Renders the metadata as a JSON document; empty for [`Metadata::None`].
    #[must_use]
    pub fn to_json(&self) -> String {
        match self {
            Metadata::None => String::new(),
            Metadata::Json(s) => s.clone(),
            Metadata::Fields(fields) => {
                let map: serde_json::Map<String, serde_json::Value> = fields
                    .iter()
                    .map(|(k, v)| {
                        (k.clone(), serde_json::to_value(v).unwrap_or(serde_json::Value::Null))
                    })
                    .collect();
                serde_json::Value::Object(map).to_string()
            }
        }
    }

    /// Writes the streamed metadata block used on disk and on the wire for
    /// versions with metadata arguments.
    pub fn encode_block(&self, buf: &mut impl BufMut) {
        if self.is_none() {
            buf.put_u8(METADATA_NONE);
            return;
        }
        match self {
            Metadata::Json(s) => {
                buf.put_u8(METADATA_JSON);
                put_str(buf, s);
            }
            Metadata::Fields(fields) => {
                buf.put_u8(METADATA_FIELDS);
                buf.put_u16_le(fields.len() as u16);
                for (key, value) in fields {
                    put_str(buf, key);
                    value.encode_tagged(buf);
                }
            }
            Metadata::None => buf.put_u8(METADATA_NONE),
        }
    }

    /// Reads a block written by [`Metadata::encode_block`]. An empty buffer
    /// is no metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] on a short block or
    /// [`ProtocolError::InvalidMetadata`] for an unknown kind.
    pub fn decode_block(buf: &mut impl Buf) -> ProtocolResult<Self> {
        if !buf.has_remaining() {
            return Ok(Metadata::None);
        }
        match buf.get_u8() {
            METADATA_NONE => Ok(Metadata::None),
            METADATA_JSON => Ok(Metadata::Json(read_str(buf)?)),
            METADATA_FIELDS => {
                need(&*buf, 2)?;
                let count = buf.get_u16_le() as usize;
                let mut fields = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    let key = read_str(buf)?;
                    let value = Arg::decode_tagged(buf).map_err(from_format)?;
                    fields.push((key, value));
                }
                Ok(Metadata::Fields(fields))
            }
            other => Err(ProtocolError::invalid_metadata(format!("unknown block kind {other}"))),
        }
    }

    /// Encodes to a standalone block; empty when there is no metadata.
    #[must_use]
    pub fn to_block(&self) -> Vec<u8> {
        if self.is_none() {
            return Vec::new();
        }
        let mut buf = Vec::new();
        self.encode_block(&mut buf);
        buf
    }
}

/// A single log call.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    /// Severity.
    pub priority: Priority,
    /// Native or script origin.
    pub source: MessageSource,
    /// Category name; empty for uncategorised messages.
    pub category: String,
    /// printf-style format string.
    pub format: String,
    /// Argument stream produced by the format codec.
    pub args: Vec<u8>,
    /// Optional structured attachment.
    pub metadata: Metadata,
}

impl LogMessage {
    /// Creates a message with no category or metadata.
    pub fn new(priority: Priority, format: impl Into<String>, args: Vec<u8>) -> Self {
        Self {
            priority,
            source: MessageSource::Cpp,
            category: String::new(),
            format: format.into(),
            args,
            metadata: Metadata::None,
        }
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Sets the message source.
    #[must_use]
    pub fn with_source(mut self, source: MessageSource) -> Self {
        self.source = source;
        self
    }

    /// Attaches metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// App instance id learned after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdAssignment {
    /// Logical instance number, e.g. the `01` of `CellApp01`.
    pub app_instance_id: u32,
}

/// Watcher-style SET message: a list of (path, value) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WatcherSet {
    /// Paths and values to set.
    pub entries: Vec<(String, String)>,
}

impl WatcherSet {
    /// The control message asking a producer to drop this endpoint.
    #[must_use]
    pub fn logger_delete() -> Self {
        Self {
            entries: vec![(LOGGER_DELETE_PATH.to_string(), String::new())],
        }
    }

    /// The notification a producer sends over UDP when it detaches.
    #[must_use]
    pub fn detach(addr: std::net::SocketAddr) -> Self {
        Self {
            entries: vec![(format!("components/{addr}/attached"), "false".to_string())],
        }
    }

    /// Whether this is the `logger/del` control message.
    #[must_use]
    pub fn is_logger_delete(&self) -> bool {
        self.entries.len() == 1 && self.entries[0].0 == LOGGER_DELETE_PATH
    }

    /// The address named by a detach notification, if this is one.
    #[must_use]
    pub fn detached_address(&self) -> Option<std::net::SocketAddr> {
        let (path, value) = self.entries.first()?;
        if value != "false" {
            return None;
        }
        path.strip_prefix("components/")?
            .strip_suffix("/attached")?
            .parse()
            .ok()
    }
}

/// Every message a producer and a collector exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum LoggerMessage {
    /// Component registration.
    Register(ComponentRegistration),
    /// A log call.
    Log(LogMessage),
    /// App instance id assignment.
    AppId(AppIdAssignment),
    /// Control message.
    Delete(WatcherSet),
}

impl LoggerMessage {
    /// Returns the message type tag.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            LoggerMessage::Register(_) => MessageType::Register,
            LoggerMessage::Log(_) => MessageType::Log,
            LoggerMessage::AppId(_) => MessageType::AppId,
            LoggerMessage::Delete(_) => MessageType::WatcherSet,
        }
    }

    /// Encodes the payload for a peer speaking `version`.
    ///
    /// Fields the peer does not understand are omitted or downgraded:
    /// metadata becomes a JSON string at minor 8 and disappears below it.
    #[must_use]
    pub fn encode(&self, version: ProtocolVersion) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.put_i32_le(self.message_type() as i32);
        match self {
            LoggerMessage::Register(reg) => {
                buf.put_u8(reg.version.major);
                buf.put_u8(reg.version.minor);
                if reg.version.has_string_logger_id() {
                    put_str(&mut buf, &reg.logger_id);
                } else {
                    buf.put_u8(reg.logger_id.parse().unwrap_or(0));
                }
                buf.put_u16_le(reg.uid);
                buf.put_u32_le(reg.pid);
                put_str(&mut buf, &reg.component_name);
            }
            LoggerMessage::Log(msg) => {
                buf.put_u8(msg.priority as u8);
                buf.put_u8(msg.source as u8);
                put_str(&mut buf, &msg.category);
                put_str(&mut buf, &msg.format);
                buf.put_u32_le(msg.args.len() as u32);
                buf.put_slice(&msg.args);
                if version.supports_metadata_args() {
                    msg.metadata.encode_block(&mut buf);
                } else if version.supports_metadata() {
                    put_str(&mut buf, &msg.metadata.to_json());
                }
            }
            LoggerMessage::AppId(id) => buf.put_u32_le(id.app_instance_id),
            LoggerMessage::Delete(set) => {
                buf.put_u32_le(set.entries.len() as u32);
                for (path, value) in &set.entries {
                    put_str(&mut buf, path);
                    put_str(&mut buf, value);
                }
            }
        }
        buf
    }

    /// Decodes a payload sent by a peer speaking `version`.
    ///
    /// Registration frames describe their own version, so `version` only
    /// matters for log frames.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] if the payload is short, or the
    /// relevant variant for an out-of-range tag or field.
    pub fn decode(payload: &[u8], version: ProtocolVersion) -> ProtocolResult<Self> {
        let mut buf = payload;
        need(&buf, 4)?;
        let kind = MessageType::try_from(buf.get_i32_le())?;

        Ok(match kind {
            MessageType::Register => {
                need(&buf, 2)?;
                let version = ProtocolVersion::new(buf.get_u8(), buf.get_u8());
                let logger_id = if version.has_string_logger_id() {
                    read_str(&mut buf)?
                } else {
                    need(&buf, 1)?;
                    buf.get_u8().to_string()
                };
                need(&buf, 6)?;
                let uid = buf.get_u16_le();
                let pid = buf.get_u32_le();
                let component_name = read_str(&mut buf)?;
                LoggerMessage::Register(ComponentRegistration {
                    version,
                    logger_id,
                    uid,
                    pid,
                    component_name,
                })
            }
            MessageType::Log => {
                need(&buf, 2)?;
                let priority = Priority::try_from(buf.get_u8())?;
                let source = MessageSource::try_from(buf.get_u8())?;
                let category = read_str(&mut buf)?;
                let format = read_str(&mut buf)?;
                need(&buf, 4)?;
                let len = buf.get_u32_le() as usize;
                need(&buf, len)?;
                let args = buf[..len].to_vec();
                buf.advance(len);
                let metadata = if version.supports_metadata_args() {
                    Metadata::decode_block(&mut buf)?
                } else if version.supports_metadata() && buf.has_remaining() {
                    let json = read_str(&mut buf)?;
                    if json.is_empty() {
                        Metadata::None
                    } else {
                        Metadata::Json(json)
                    }
                } else {
                    Metadata::None
                };
                LoggerMessage::Log(LogMessage {
                    priority,
                    source,
                    category,
                    format,
                    args,
                    metadata,
                })
            }
            MessageType::AppId => {
                need(&buf, 4)?;
                LoggerMessage::AppId(AppIdAssignment {
                    app_instance_id: buf.get_u32_le(),
                })
            }
            MessageType::WatcherSet => {
                need(&buf, 4)?;
                let count = buf.get_u32_le() as usize;
                let mut entries = Vec::with_capacity(count.min(16));
                for _ in 0..count {
                    let path = read_str(&mut buf)?;
                    let value = read_str(&mut buf)?;
                    entries.push((path, value));
                }
                LoggerMessage::Delete(WatcherSet { entries })
            }
        })
    }

    /// Encodes the payload and wraps it in a TCP frame.
    #[must_use]
    pub fn to_frame(&self, version: ProtocolVersion) -> Bytes {
        crate::frame::encode_frame(&self.encode(version))
    }
}

fn need(buf: &impl Buf, n: usize) -> ProtocolResult<()> {
    if buf.remaining() < n {
        return Err(ProtocolError::Truncated {
            needed: n,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn from_format(err: FormatError) -> ProtocolError {
    match err {
        FormatError::TruncatedStream { needed, available } => {
            ProtocolError::Truncated { needed, available }
        }
        other => ProtocolError::Format(other),
    }
}

fn read_str(buf: &mut impl Buf) -> ProtocolResult<String> {
    get_str(buf).map_err(from_format)
}
