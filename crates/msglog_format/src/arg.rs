//! Argument values.

use crate::error::{FormatError, FormatResult};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// A single argument to a log call.
///
/// The set of variants is closed: every printf conversion maps onto one of
/// them, and the streamed form widens each to a canonical size so replay
/// does not depend on the producer's word size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    /// Signed integer (`%d`, `%i`, `*` widths).
    Int(i64),
    /// Unsigned integer (`%u`, `%o`, `%x`).
    UInt(u64),
    /// Floating point value (`%f`, `%e`, `%g`).
    Float(f64),
    /// String (`%s`).
    Str(String),
    /// Character (`%c`).
    Char(char),
    /// Pointer value (`%p`).
    Ptr(u64),
}

impl Arg {
    /// Short name of the variant, used in mismatch errors.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Arg::Int(_) => "int",
            Arg::UInt(_) => "unsigned",
            Arg::Float(_) => "float",
            Arg::Str(_) => "string",
            Arg::Char(_) => "char",
            Arg::Ptr(_) => "pointer",
        }
    }

    /// Writes the value prefixed with a one-byte type tag.
    ///
    /// Used where no format string describes the value, such as streamed
    /// metadata.
    pub fn encode_tagged(&self, buf: &mut impl BufMut) {
        match self {
            Arg::Int(v) => {
                buf.put_u8(TAG_INT);
                buf.put_i64_le(*v);
            }
            Arg::UInt(v) => {
                buf.put_u8(TAG_UINT);
                buf.put_u64_le(*v);
            }
            Arg::Float(v) => {
                buf.put_u8(TAG_FLOAT);
                buf.put_f64_le(*v);
            }
            Arg::Str(s) => {
                buf.put_u8(TAG_STR);
                put_str(buf, s);
            }
            Arg::Char(c) => {
                buf.put_u8(TAG_CHAR);
                buf.put_u32_le(u32::from(*c));
            }
            Arg::Ptr(v) => {
                buf.put_u8(TAG_PTR);
                buf.put_u64_le(*v);
            }
        }
    }

    /// Reads a value written by [`Arg::encode_tagged`].
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::TruncatedStream`] if the buffer is short, or
    /// [`FormatError::UnknownTag`] for an unrecognised tag.
    pub fn decode_tagged(buf: &mut impl Buf) -> FormatResult<Self> {
        need(buf.remaining(), 1)?;
        match buf.get_u8() {
            TAG_INT => {
                need(buf.remaining(), 8)?;
                Ok(Arg::Int(buf.get_i64_le()))
            }
            TAG_UINT => {
                need(buf.remaining(), 8)?;
                Ok(Arg::UInt(buf.get_u64_le()))
            }
            TAG_FLOAT => {
                need(buf.remaining(), 8)?;
                Ok(Arg::Float(buf.get_f64_le()))
            }
            TAG_STR => Ok(Arg::Str(get_str(buf)?)),
            TAG_CHAR => {
                need(buf.remaining(), 4)?;
                Ok(Arg::Char(
                    char::from_u32(buf.get_u32_le()).unwrap_or(char::REPLACEMENT_CHARACTER),
                ))
            }
            TAG_PTR => {
                need(buf.remaining(), 8)?;
                Ok(Arg::Ptr(buf.get_u64_le()))
            }
            other => Err(FormatError::UnknownTag(other)),
        }
    }
}

impl std::fmt::Display for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Int(v) => write!(f, "{v}"),
            Arg::UInt(v) => write!(f, "{v}"),
            Arg::Float(v) => write!(f, "{v}"),
            Arg::Str(s) => f.write_str(s),
            Arg::Char(c) => write!(f, "{c}"),
            Arg::Ptr(v) => write!(f, "{v:#x}"),
        }
    }
}

const TAG_INT: u8 = 1;
const TAG_UINT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_CHAR: u8 = 5;
const TAG_PTR: u8 = 6;

macro_rules! arg_from {
    ($variant:ident, $target:ty, $($t:ty),+) => {
        $(impl From<$t> for Arg {
            fn from(v: $t) -> Self {
                Arg::$variant(<$target>::from(v))
            }
        })+
    };
}

arg_from!(Int, i64, i8, i16, i32, i64);
arg_from!(UInt, u64, u8, u16, u32, u64);
arg_from!(Float, f64, f32, f64);

impl From<usize> for Arg {
    fn from(v: usize) -> Self {
        Arg::UInt(v as u64)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Str(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Str(v)
    }
}

impl From<char> for Arg {
    fn from(v: char) -> Self {
        Arg::Char(v)
    }
}

/// Fails with [`FormatError::TruncatedStream`] unless `n` bytes are available.
pub(crate) fn need(available: usize, n: usize) -> FormatResult<()> {
    if available < n {
        return Err(FormatError::truncated(n, available));
    }
    Ok(())
}

/// Writes a `u32` length-prefixed UTF-8 string.
pub fn put_str(buf: &mut impl BufMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Reads a `u32` length-prefixed string; invalid UTF-8 is replaced.
///
/// # Errors
///
/// Returns [`FormatError::TruncatedStream`] if the buffer is short.
pub fn get_str(buf: &mut impl Buf) -> FormatResult<String> {
    need(buf.remaining(), 4)?;
    let len = buf.get_u32_le() as usize;
    need(buf.remaining(), len)?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    Ok(String::from_utf8(raw).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_values_survive_encoding() {
        let values = vec![
            Arg::Int(-7),
            Arg::UInt(u64::MAX),
            Arg::Float(2.5),
            Arg::from("cell"),
            Arg::Char('x'),
            Arg::Ptr(0xdead_beef),
        ];
        let mut buf = Vec::new();
        for v in &values {
            v.encode_tagged(&mut buf);
        }

        let mut slice = buf.as_slice();
        for v in &values {
            assert_eq!(&Arg::decode_tagged(&mut slice).unwrap(), v);
        }
        assert!(slice.is_empty());
    }

    #[test]
    fn short_tagged_value_is_truncation() {
        let mut buf = Vec::new();
        Arg::Int(1).encode_tagged(&mut buf);
        let mut short = &buf[..5];
        assert!(matches!(
            Arg::decode_tagged(&mut short),
            Err(FormatError::TruncatedStream { needed: 8, available: 4 })
        ));
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut slice: &[u8] = &[0x7f];
        assert_eq!(Arg::decode_tagged(&mut slice), Err(FormatError::UnknownTag(0x7f)));
    }

    #[test]
    fn conversions_pick_variant() {
        assert_eq!(Arg::from(5i32), Arg::Int(5));
        assert_eq!(Arg::from(5u16), Arg::UInt(5));
        assert_eq!(Arg::from(1.5f32), Arg::Float(1.5));
        assert_eq!(Arg::from(String::from("s")).kind_name(), "string");
    }
}
