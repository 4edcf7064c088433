//! # Message Logger Format Codec
//!
//! printf-style format strings, compact argument streams, and replay of
//! those streams into text.
//!
//! A log call carries a format string and a list of arguments. Rather than
//! formatting on the producer, the arguments are streamed into a compact
//! binary form ([`stream_args`]) and sent alongside the format string. The
//! collector stores the stream verbatim; readers later replay it with
//! [`interpolate`], which reproduces C `printf` output.
//!
//! ## Usage
//!
//! ```
//! use msglog_format::{interpolate, stream_args, Arg, FormatString};
//!
//! let fmt = FormatString::parse("%-6s|%5.1f%%").unwrap();
//! let stream = stream_args(&fmt, &[Arg::from("load"), Arg::from(99.44)]).unwrap();
//!
//! let mut text = String::new();
//! interpolate(&fmt, &stream, &mut text).unwrap();
//! assert_eq!(text, "load  | 99.4%");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod arg;
mod error;
mod printf;
mod stream;
mod token;

pub use arg::{get_str, put_str, Arg};
pub use error::{FormatError, FormatResult};
pub use stream::{decode_args, stream_args, ArgDecoder, ArgEncoder, StreamVersion, MAX_FIELD_WIDTH};
pub use token::{Conversion, ConversionKind, Count, Flags, FormatString, Length, Token};

use std::fmt::Write;

/// Replays `stream` through `format`, writing the text into `out`.
///
/// # Errors
///
/// Returns [`FormatError::TruncatedStream`] if the stream ends early. Text
/// written before the failure is left in `out`; callers that need
/// all-or-nothing output should use [`FormatString::interpolate_to_string`].
pub fn interpolate(format: &FormatString, stream: &[u8], out: &mut impl Write) -> FormatResult<()> {
    interpolate_with(format, &mut ArgDecoder::new(stream), out)
}

/// Like [`interpolate`], reading from an existing decoder.
///
/// # Errors
///
/// Returns [`FormatError::TruncatedStream`] if the stream ends early.
pub fn interpolate_with(
    format: &FormatString,
    decoder: &mut ArgDecoder<'_>,
    out: &mut impl Write,
) -> FormatResult<()> {
    for token in format.tokens() {
        match token {
            Token::Literal { text, .. } => out.write_str(text)?,
            Token::Conversion(conversion) => {
                let decoded = decoder.next(conversion)?;
                printf::render(out, conversion, &decoded)?;
            }
        }
    }
    Ok(())
}

impl FormatString {
    /// Streams `args` against this format string.
    ///
    /// # Errors
    ///
    /// See [`ArgEncoder::encode`].
    pub fn stream_args(&self, args: &[Arg]) -> FormatResult<Vec<u8>> {
        stream_args(self, args)
    }

    /// Replays a current-version stream into a new string.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::TruncatedStream`] if the stream ends early.
    pub fn interpolate_to_string(&self, stream: &[u8]) -> FormatResult<String> {
        self.interpolate_versioned(stream, StreamVersion::default())
    }

    /// Replays a stream written with the given layout version.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::TruncatedStream`] if the stream ends early.
    pub fn interpolate_versioned(&self, stream: &[u8], version: StreamVersion) -> FormatResult<String> {
        let mut text = String::with_capacity(self.as_str().len() + stream.len());
        interpolate_with(self, &mut ArgDecoder::new(stream).with_version(version), &mut text)?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sprintf(fmt: &str, args: &[Arg]) -> String {
        let fmt = FormatString::parse(fmt).unwrap();
        let stream = fmt.stream_args(args).unwrap();
        fmt.interpolate_to_string(&stream).unwrap()
    }

    /// Expected values are what glibc's `sprintf` produces.
    #[test]
    fn matches_c_printf() {
        let cases: Vec<(&str, Vec<Arg>, &str)> = vec![
            ("%s failed with code %d", vec!["flush".into(), 5.into()], "flush failed with code 5"),
            ("%d", vec![42.into()], "42"),
            ("%5d|", vec![42.into()], "   42|"),
            ("%-5d|", vec![42.into()], "42   |"),
            ("%05d", vec![(-42).into()], "-0042"),
            ("%+d % d", vec![7.into(), 7.into()], "+7  7"),
            ("%.3d", vec![7.into()], "007"),
            ("%8.3d|", vec![(-7).into()], "    -007|"),
            ("%.0d|", vec![0.into()], "|"),
            ("%u", vec![u32::MAX.into()], "4294967295"),
            ("%x %#X %#o", vec![255u32.into(), 255u32.into(), 8u32.into()], "ff 0XFF 010"),
            ("%08.3x", vec![10u32.into()], "     00a"),
            ("%hd", vec![65535.into()], "-1"),
            ("%hhu", vec![257u32.into()], "1"),
            ("%ld", vec![(-9_000_000_000i64).into()], "-9000000000"),
            ("%llu", vec![u64::MAX.into()], "18446744073709551615"),
            ("%f", vec![3.14159.into()], "3.141590"),
            ("%.2f", vec![2.675.into()], "2.67"),
            ("%10.3f|", vec![(-1.5).into()], "    -1.500|"),
            ("%e", vec![12345.678.into()], "1.234568e+04"),
            ("%.2E", vec![0.000123.into()], "1.23E-04"),
            ("%g %g %g", vec![0.0001.into(), 1_000_000.0.into(), 123.456.into()], "0.0001 1e+06 123.456"),
            ("%G", vec![1.5e-10.into()], "1.5E-10"),
            ("%#g %g", vec![1.0.into(), 0.0.into()], "1.00000 0"),
            ("%10s|%-10s|", vec!["right".into(), "left".into()], "     right|left      |"),
            ("%.3s", vec!["truncate".into()], "tru"),
            ("%*.*s|", vec![6.into(), 2.into(), "abc".into()], "    ab|"),
            ("%-*d|%*d|", vec![4.into(), 9.into(), (-4).into(), 9.into()], "9   |9   |"),
            ("%c%3c", vec!['A'.into(), 'z'.into()], "A  z"),
            ("%p %p", vec![Arg::Ptr(0x1000), Arg::Ptr(0)], "0x1000 (nil)"),
            ("%%d %d", vec![1.into()], "%d 1"),
            ("%F %f %5f|", vec![f64::INFINITY.into(), f64::NEG_INFINITY.into(), f64::NAN.into()], "INF -inf   nan|"),
        ];

        for (fmt, args, expected) in cases {
            assert_eq!(sprintf(fmt, &args), expected, "format {fmt:?}");
        }
    }

    #[test]
    fn truncated_stream_aborts_only_that_entry() {
        let fmt = FormatString::parse("%s=%d").unwrap();
        let good = fmt.stream_args(&["a".into(), 1.into()]).unwrap();
        let short = &good[..good.len() - 2];

        assert!(matches!(
            fmt.interpolate_to_string(short),
            Err(FormatError::TruncatedStream { .. })
        ));
        assert_eq!(fmt.interpolate_to_string(&good).unwrap(), "a=1");
    }

    #[test]
    fn oversized_width_is_not_rendered() {
        let fmt = FormatString::parse("x=%*d").unwrap();
        let mut stream = 200_000_000i32.to_le_bytes().to_vec();
        stream.extend_from_slice(&7i32.to_le_bytes());

        let mut text = String::new();
        assert!(matches!(
            interpolate(&fmt, &stream, &mut text),
            Err(FormatError::FieldTooWide { .. })
        ));
        assert_eq!(text, "x=");
        assert!(fmt.interpolate_to_string(&stream).is_err());
    }

    #[test]
    fn legacy_long_replay() {
        let fmt = FormatString::parse("n=%lu").unwrap();
        let legacy = 12u32.to_le_bytes();
        assert_eq!(
            fmt.interpolate_versioned(&legacy, StreamVersion::Legacy32).unwrap(),
            "n=12"
        );
    }

    proptest! {
        #[test]
        fn integers_match_native_formatting(v in any::<i32>(), w in 0usize..12) {
            let text = sprintf(&format!("[%{w}d|%-{w}x]"), &[v.into(), (v as u32).into()]);
            prop_assert_eq!(text, format!("[{v:>w$}|{:<w$x}]", v as u32));
        }

        #[test]
        fn strings_match_native_formatting(s in "[a-zA-Z0-9 ]{0,20}", p in 0usize..24) {
            let text = sprintf(&format!("<%.{p}s>"), &[s.as_str().into()]);
            let expected: String = s.chars().take(p).collect();
            prop_assert_eq!(text, format!("<{expected}>"));
        }

        #[test]
        fn fixed_floats_match_native_formatting(v in -1.0e9f64..1.0e9, p in 0usize..9) {
            let text = sprintf(&format!("%.{p}f"), &[v.into()]);
            prop_assert_eq!(text, format!("{v:.p$}"));
        }
    }
}
