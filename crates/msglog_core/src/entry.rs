//! Fixed-size entry records.
//!
//! ```text
//! ┌──────────┬───────┬──────────────┬─────────────┬────────┬──────────┐
//! │ secs i64 │ ms u16│ component u32│ category u16│ src u8 │ prio u8  │
//! ├──────────┴───────┴──┬───────────┴─────────────┴──┬─────┴──────────┤
//! │ string_offset u32   │ args_offset u32, len u32    │ meta off, len  │
//! └─────────────────────┴─────────────────────────────┴────────────────┘
//! ```
//!
//! All fields are little-endian; a record is [`LogEntry::SIZE`] bytes.

use crate::error::{CoreError, CoreResult};
use crate::types::LogTime;
use bytes::{Buf, BufMut};
use msglog_protocol::{MessageSource, Priority};

/// One log entry as stored in an `entries.<suffix>` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntry {
    /// When the collector received the message.
    pub time: LogTime,
    /// Component id within the user's components directory.
    pub component_id: u32,
    /// Category id, 0 for none.
    pub category_id: u16,
    /// Native or script origin.
    pub source: MessageSource,
    /// Severity.
    pub priority: Priority,
    /// Offset of the format string in the `strings` registry.
    pub string_offset: u32,
    /// Offset of the argument stream in the `args` file.
    pub args_offset: u32,
    /// Length of the argument stream.
    pub args_len: u32,
    /// Offset of the metadata block in the `metadata` file.
    pub metadata_offset: u32,
    /// Length of the metadata block, 0 for none.
    pub metadata_len: u32,
}

impl LogEntry {
    /// Encoded size in bytes.
    pub const SIZE: usize = 38;

    /// Appends the encoded record to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i64_le(self.time.secs);
        buf.put_u16_le(self.time.msecs);
        buf.put_u32_le(self.component_id);
        buf.put_u16_le(self.category_id);
        buf.put_u8(self.source as u8);
        buf.put_u8(self.priority as u8);
        buf.put_u32_le(self.string_offset);
        buf.put_u32_le(self.args_offset);
        buf.put_u32_le(self.args_len);
        buf.put_u32_le(self.metadata_offset);
        buf.put_u32_le(self.metadata_len);
    }

    /// Encodes into a new buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.encode(&mut buf);
        buf
    }

    /// Decodes one record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentCorruption`] if `data` is not exactly
    /// [`LogEntry::SIZE`] bytes or holds an invalid priority or source.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() != Self::SIZE {
            return Err(CoreError::segment_corruption(format!(
                "entry record is {} bytes, expected {}",
                data.len(),
                Self::SIZE
            )));
        }
        let mut buf = data;
        let secs = buf.get_i64_le();
        let msecs = buf.get_u16_le();
        let component_id = buf.get_u32_le();
        let category_id = buf.get_u16_le();
        let source = MessageSource::try_from(buf.get_u8())
            .map_err(|e| CoreError::segment_corruption(e.to_string()))?;
        let priority =
            Priority::try_from(buf.get_u8()).map_err(|e| CoreError::segment_corruption(e.to_string()))?;

        Ok(Self {
            time: LogTime { secs, msecs },
            component_id,
            category_id,
            source,
            priority,
            string_offset: buf.get_u32_le(),
            args_offset: buf.get_u32_le(),
            args_len: buf.get_u32_le(),
            metadata_offset: buf.get_u32_le(),
            metadata_len: buf.get_u32_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LogEntry {
        LogEntry {
            time: LogTime::new(1_760_000_000, 123),
            component_id: 4,
            category_id: 2,
            source: MessageSource::Script,
            priority: Priority::Error,
            string_offset: 96,
            args_offset: 1024,
            args_len: 13,
            metadata_offset: 0,
            metadata_len: 0,
        }
    }

    #[test]
    fn fixed_size_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), LogEntry::SIZE);
        assert_eq!(&bytes[..8], &1_760_000_000i64.to_le_bytes());
        assert_eq!(bytes[16], MessageSource::Script as u8);
        assert_eq!(bytes[17], Priority::Error as u8);
        assert_eq!(LogEntry::decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn rejects_bad_records() {
        let mut bytes = sample().to_bytes();
        assert!(LogEntry::decode(&bytes[..10]).is_err());
        bytes[17] = 200;
        assert!(matches!(
            LogEntry::decode(&bytes),
            Err(CoreError::SegmentCorruption { .. })
        ));
    }
}
