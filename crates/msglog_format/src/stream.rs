//! Binary argument streams.
//!
//! Each conversion of a format string writes exactly one value, preceded by
//! one 32-bit value per `*` width or precision. Widths are canonical:
//!
//! | Conversion            | Stream type            |
//! |-----------------------|------------------------|
//! | `d i c`, `*`          | `i32` (`i64` with `l`/`ll`) |
//! | `u o x X`             | `u32` (`u64` with `l`/`ll`) |
//! | `f e g` (any length)  | `f64`                  |
//! | `p`                   | `u64`                  |
//! | `s`                   | `u32` length + UTF-8   |
//!
//! All values are little-endian.

use crate::arg::{get_str, need, put_str, Arg};
use crate::error::{FormatError, FormatResult};
use crate::token::{Conversion, ConversionKind, Count, FormatString};
use bytes::{Buf, BufMut};

/// Largest width or precision magnitude accepted when decoding.
///
/// Larger values, whether inline or `*`, fail with
/// [`FormatError::FieldTooWide`].
pub const MAX_FIELD_WIDTH: usize = 4096;

/// Version of the argument stream layout.
///
/// Streams written before [`StreamVersion::Wide`] stored `long`
/// conversions as 32-bit values; they are still readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum StreamVersion {
    /// `l` conversions are 32-bit.
    Legacy32,
    /// `l` and `ll` conversions are 64-bit.
    #[default]
    Wide,
}

/// Encodes argument lists against a parsed format string.
pub struct ArgEncoder<'f> {
    format: &'f FormatString,
    buf: Vec<u8>,
}

impl<'f> ArgEncoder<'f> {
    /// Creates an encoder for one message.
    #[must_use]
    pub fn new(format: &'f FormatString) -> Self {
        Self {
            format,
            buf: Vec::with_capacity(16),
        }
    }

    /// Streams `args` and returns the encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::ArgumentCount`] if the number of arguments
    /// differs from [`FormatString::arity`], or
    /// [`FormatError::ArgumentMismatch`] if an argument cannot be
    /// represented by its conversion.
    pub fn encode(mut self, args: &[Arg]) -> FormatResult<Vec<u8>> {
        let expected = self.format.arity();
        if args.len() != expected {
            return Err(FormatError::ArgumentCount {
                expected,
                found: args.len(),
            });
        }

        let mut index = 0;
        for conversion in self.format.conversions() {
            if conversion.width.is_star() {
                self.put_count(index, &args[index])?;
                index += 1;
            }
            if conversion.precision.is_star() {
                self.put_count(index, &args[index])?;
                index += 1;
            }
            self.put_value(conversion, index, &args[index])?;
            index += 1;
        }

        Ok(self.buf)
    }

    fn put_count(&mut self, index: usize, arg: &Arg) -> FormatResult<()> {
        let value = match arg {
            Arg::Int(v) => *v,
            Arg::UInt(v) => *v as i64,
            other => return Err(mismatch(index, "int width", other)),
        };
        self.buf.put_i32_le(value as i32);
        Ok(())
    }

    fn put_value(&mut self, conversion: &Conversion, index: usize, arg: &Arg) -> FormatResult<()> {
        let wide = conversion.length.is_wide();
        match conversion.kind {
            ConversionKind::Signed => {
                let v = match arg {
                    Arg::Int(v) => *v,
                    Arg::UInt(v) => *v as i64,
                    Arg::Char(c) => i64::from(u32::from(*c)),
                    other => return Err(mismatch(index, "integer", other)),
                };
                if wide {
                    self.buf.put_i64_le(v);
                } else {
                    self.buf.put_i32_le(v as i32);
                }
            }
            ConversionKind::Unsigned | ConversionKind::Octal | ConversionKind::Hex { .. } => {
                let v = match arg {
                    Arg::UInt(v) | Arg::Ptr(v) => *v,
                    Arg::Int(v) => *v as u64,
                    Arg::Char(c) => u64::from(u32::from(*c)),
                    other => return Err(mismatch(index, "integer", other)),
                };
                if wide {
                    self.buf.put_u64_le(v);
                } else {
                    self.buf.put_u32_le(v as u32);
                }
            }
            ConversionKind::Fixed { .. }
            | ConversionKind::Exponent { .. }
            | ConversionKind::General { .. } => {
                let v = match arg {
                    Arg::Float(v) => *v,
                    Arg::Int(v) => *v as f64,
                    Arg::UInt(v) => *v as f64,
                    other => return Err(mismatch(index, "float", other)),
                };
                self.buf.put_f64_le(v);
            }
            ConversionKind::Str => match arg {
                Arg::Str(s) => put_str(&mut self.buf, s),
                other => return Err(mismatch(index, "string", other)),
            },
            ConversionKind::Char => {
                let v = match arg {
                    Arg::Char(c) => u32::from(*c) as i32,
                    Arg::Int(v) => *v as i32,
                    Arg::UInt(v) => *v as i32,
                    other => return Err(mismatch(index, "char", other)),
                };
                self.buf.put_i32_le(v);
            }
            ConversionKind::Pointer => {
                let v = match arg {
                    Arg::Ptr(v) | Arg::UInt(v) => *v,
                    other => return Err(mismatch(index, "pointer", other)),
                };
                self.buf.put_u64_le(v);
            }
        }
        Ok(())
    }
}

fn mismatch(index: usize, expected: &'static str, found: &Arg) -> FormatError {
    FormatError::ArgumentMismatch {
        index,
        expected,
        found: found.kind_name(),
    }
}

/// A value decoded from a stream, ready for formatting.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Decoded {
    pub width: Option<i64>,
    pub precision: Option<i64>,
    pub value: Arg,
}

/// Reads argument values back out of a stream.
pub struct ArgDecoder<'a> {
    buf: &'a [u8],
    version: StreamVersion,
}

impl<'a> ArgDecoder<'a> {
    /// Creates a decoder over a current-version stream.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            version: StreamVersion::default(),
        }
    }

    /// Sets the stream version to decode.
    #[must_use]
    pub fn with_version(mut self, version: StreamVersion) -> Self {
        self.version = version;
        self
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Decodes every argument of `format`, including `*` widths, in order.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::TruncatedStream`] if the stream is short.
    pub fn decode_all(&mut self, format: &FormatString) -> FormatResult<Vec<Arg>> {
        let mut args = Vec::with_capacity(format.arity());
        for conversion in format.conversions() {
            let decoded = self.next(conversion)?;
            args.extend(decoded.width.map(Arg::Int));
            args.extend(decoded.precision.map(Arg::Int));
            args.push(decoded.value);
        }
        Ok(args)
    }

    pub(crate) fn next(&mut self, conversion: &Conversion) -> FormatResult<Decoded> {
        let width = self.count(conversion.width)?;
        let precision = self.count(conversion.precision)?;
        let value = self.value(conversion)?;
        Ok(Decoded {
            width,
            precision,
            value,
        })
    }

    fn count(&mut self, count: Count) -> FormatResult<Option<i64>> {
        let value = match count {
            Count::Star => {
                need(self.buf.remaining(), 4)?;
                i64::from(self.buf.get_i32_le())
            }
            Count::Fixed(n) => i64::try_from(n).unwrap_or(i64::MAX),
            Count::None => return Ok(None),
        };
        if value.unsigned_abs() > MAX_FIELD_WIDTH as u64 {
            return Err(FormatError::FieldTooWide {
                value,
                limit: MAX_FIELD_WIDTH,
            });
        }
        Ok(Some(value))
    }

    fn value(&mut self, conversion: &Conversion) -> FormatResult<Arg> {
        let wide = match self.version {
            StreamVersion::Wide => conversion.length.is_wide(),
            StreamVersion::Legacy32 => conversion.length == crate::token::Length::LongLong,
        };
        let buf = &mut self.buf;

        Ok(match conversion.kind {
            ConversionKind::Signed | ConversionKind::Char => {
                if wide && conversion.kind == ConversionKind::Signed {
                    need(buf.remaining(), 8)?;
                    Arg::Int(buf.get_i64_le())
                } else {
                    need(buf.remaining(), 4)?;
                    Arg::Int(i64::from(buf.get_i32_le()))
                }
            }
            ConversionKind::Unsigned | ConversionKind::Octal | ConversionKind::Hex { .. } => {
                if wide {
                    need(buf.remaining(), 8)?;
                    Arg::UInt(buf.get_u64_le())
                } else {
                    need(buf.remaining(), 4)?;
                    Arg::UInt(u64::from(buf.get_u32_le()))
                }
            }
            ConversionKind::Fixed { .. }
            | ConversionKind::Exponent { .. }
            | ConversionKind::General { .. } => {
                need(buf.remaining(), 8)?;
                Arg::Float(buf.get_f64_le())
            }
            ConversionKind::Str => Arg::Str(get_str(buf)?),
            ConversionKind::Pointer => {
                need(buf.remaining(), 8)?;
                Arg::Ptr(buf.get_u64_le())
            }
        })
    }
}

/// Streams `args` against `format`.
///
/// # Errors
///
/// See [`ArgEncoder::encode`].
pub fn stream_args(format: &FormatString, args: &[Arg]) -> FormatResult<Vec<u8>> {
    ArgEncoder::new(format).encode(args)
}

/// Decodes the typed arguments of a stream.
///
/// # Errors
///
/// Returns [`FormatError::TruncatedStream`] if the stream is short.
pub fn decode_args(format: &FormatString, stream: &[u8]) -> FormatResult<Vec<Arg>> {
    ArgDecoder::new(stream).decode_all(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> FormatString {
        FormatString::parse(text).unwrap()
    }

    #[test]
    fn default_integers_are_32_bit() {
        let bytes = stream_args(&parse("%d %u"), &[Arg::Int(-1), Arg::UInt(7)]).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &(-1i32).to_le_bytes());
    }

    #[test]
    fn long_integers_are_64_bit() {
        let bytes = stream_args(&parse("%ld %llu"), &[Arg::Int(-1), Arg::UInt(7)]).unwrap();
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn floats_are_always_64_bit() {
        let bytes = stream_args(&parse("%f %Lg"), &[Arg::Float(1.0), Arg::Float(2.0)]).unwrap();
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn star_width_precedes_value() {
        let fmt = parse("%*d");
        let bytes = stream_args(&fmt, &[Arg::Int(5), Arg::Int(42)]).unwrap();
        assert_eq!(&bytes[..4], &5i32.to_le_bytes());
        assert_eq!(decode_args(&fmt, &bytes).unwrap(), vec![Arg::Int(5), Arg::Int(42)]);
    }

    #[test]
    fn argument_count_checked() {
        let err = stream_args(&parse("%s %d"), &[Arg::from("x")]).unwrap_err();
        assert_eq!(err, FormatError::ArgumentCount { expected: 2, found: 1 });
    }

    #[test]
    fn argument_type_checked() {
        let err = stream_args(&parse("%s"), &[Arg::Int(3)]).unwrap_err();
        assert!(matches!(err, FormatError::ArgumentMismatch { index: 0, .. }));
    }

    #[test]
    fn truncated_stream_detected() {
        let fmt = parse("%s and %d");
        let bytes = stream_args(&fmt, &[Arg::from("abc"), Arg::Int(1)]).unwrap();
        let err = decode_args(&fmt, &bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, FormatError::TruncatedStream { .. }));
    }

    #[test]
    fn oversized_star_width_rejected() {
        let fmt = parse("x=%*d");
        let mut stream = 200_000_000i32.to_le_bytes().to_vec();
        stream.extend_from_slice(&7i32.to_le_bytes());

        assert_eq!(
            decode_args(&fmt, &stream),
            Err(FormatError::FieldTooWide {
                value: 200_000_000,
                limit: MAX_FIELD_WIDTH
            })
        );

        let mut negative = (-(MAX_FIELD_WIDTH as i32) - 1).to_le_bytes().to_vec();
        negative.extend_from_slice(&7i32.to_le_bytes());
        assert!(matches!(
            decode_args(&fmt, &negative),
            Err(FormatError::FieldTooWide { .. })
        ));
    }

    #[test]
    fn widths_up_to_the_limit_decode() {
        let fmt = parse("%*.*s");
        let limit = MAX_FIELD_WIDTH as i64;
        let bytes = stream_args(&fmt, &[Arg::Int(-limit), Arg::Int(limit), Arg::from("s")]).unwrap();
        assert_eq!(
            decode_args(&fmt, &bytes).unwrap(),
            vec![Arg::Int(-limit), Arg::Int(limit), Arg::from("s")]
        );

        let wide = parse("%5000d");
        let bytes = stream_args(&wide, &[Arg::Int(1)]).unwrap();
        assert!(matches!(
            decode_args(&wide, &bytes),
            Err(FormatError::FieldTooWide { value: 5000, .. })
        ));
    }

    #[test]
    fn legacy_streams_read_long_as_32_bit() {
        let fmt = parse("%ld");
        let legacy = 77i32.to_le_bytes();
        let args = ArgDecoder::new(&legacy)
            .with_version(StreamVersion::Legacy32)
            .decode_all(&fmt)
            .unwrap();
        assert_eq!(args, vec![Arg::Int(77)]);
    }
}
