//! Format string tokenizer.
//!
//! A format string is split into literal spans and typed conversions,
//! following the C `printf` grammar:
//!
//! ```text
//! %[flags][width][.precision][length]conversion
//! ```

use crate::error::{FormatError, FormatResult};
use std::ops::Range;

/// printf flag characters attached to a conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// `-`: left-justify within the field.
    pub left: bool,
    /// `+`: always print a sign for signed conversions.
    pub plus: bool,
    /// ` `: print a space where a `+` would go.
    pub space: bool,
    /// `#`: alternate form (`0x` prefix, forced decimal point).
    pub alt: bool,
    /// `0`: pad numeric conversions with zeros.
    pub zero: bool,
}

/// How a minimum width or precision is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    /// Not given.
    None,
    /// Given inline in the format string.
    Fixed(usize),
    /// Given as `*`: taken from the argument stream ahead of the value.
    Star,
}

impl Count {
    /// Returns true if this count consumes an argument.
    #[must_use]
    pub const fn is_star(self) -> bool {
        matches!(self, Count::Star)
    }
}

/// Length modifier of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    /// No modifier.
    Default,
    /// `hh`
    Char,
    /// `h`
    Short,
    /// `l`
    Long,
    /// `ll`, `q`, `j`, `z`, `t`
    LongLong,
    /// `L`
    LongDouble,
}

impl Length {
    /// Returns true if integers with this modifier stream as 64-bit values.
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(self, Length::Long | Length::LongLong)
    }
}

/// Base conversion type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind {
    /// `d` or `i`
    Signed,
    /// `u`
    Unsigned,
    /// `o`
    Octal,
    /// `x` (lower) or `X` (upper)
    Hex {
        /// Upper-case digits.
        upper: bool,
    },
    /// `f` or `F`
    Fixed {
        /// Upper-case `INF`/`NAN`.
        upper: bool,
    },
    /// `e` or `E`
    Exponent {
        /// Upper-case exponent marker.
        upper: bool,
    },
    /// `g` or `G`
    General {
        /// Upper-case exponent marker.
        upper: bool,
    },
    /// `s`
    Str,
    /// `c`
    Char,
    /// `p`
    Pointer,
}

impl ConversionKind {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'd' | 'i' => Self::Signed,
            'u' => Self::Unsigned,
            'o' => Self::Octal,
            'x' => Self::Hex { upper: false },
            'X' => Self::Hex { upper: true },
            'f' => Self::Fixed { upper: false },
            'F' => Self::Fixed { upper: true },
            'e' => Self::Exponent { upper: false },
            'E' => Self::Exponent { upper: true },
            'g' => Self::General { upper: false },
            'G' => Self::General { upper: true },
            's' => Self::Str,
            'c' => Self::Char,
            'p' => Self::Pointer,
            _ => return None,
        })
    }

    /// Returns true for the floating point conversions.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            Self::Fixed { .. } | Self::Exponent { .. } | Self::General { .. }
        )
    }

    /// Returns true for the integer conversions (`d i u o x X`).
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Signed | Self::Unsigned | Self::Octal | Self::Hex { .. }
        )
    }
}

/// A single typed conversion such as `%-08.3lx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    /// Flag characters.
    pub flags: Flags,
    /// Minimum field width.
    pub width: Count,
    /// Precision (maximum width for strings).
    pub precision: Count,
    /// Length modifier.
    pub length: Length,
    /// Base type.
    pub kind: ConversionKind,
}

impl Conversion {
    /// Number of values this conversion consumes from an argument list,
    /// counting `*` widths.
    #[must_use]
    pub fn arity(&self) -> usize {
        1 + usize::from(self.width.is_star()) + usize::from(self.precision.is_star())
    }
}

/// A token of a parsed format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Literal text, with `%%` already collapsed.
    Literal {
        /// Text to emit verbatim.
        text: String,
        /// Byte range this literal occupies in the source string.
        span: Range<usize>,
    },
    /// A typed conversion.
    Conversion(Conversion),
}

/// A parsed printf-style format string.
///
/// Parsing is done once per distinct format string; the token list is then
/// reused for every streamed or interpolated message.
///
/// # Example
///
/// ```
/// use msglog_format::{FormatString, Arg};
///
/// let fmt = FormatString::parse("%s failed with code %d").unwrap();
/// let bytes = fmt.stream_args(&[Arg::from("flush"), Arg::from(5)]).unwrap();
/// assert_eq!(fmt.interpolate_to_string(&bytes).unwrap(), "flush failed with code 5");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatString {
    text: String,
    tokens: Vec<Token>,
}

impl FormatString {
    /// Parses a format string into tokens.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::Malformed`] for an unknown conversion
    /// character (e.g. `%v`), a dangling `%`, or an unsupported `%n`.
    pub fn parse(text: &str) -> FormatResult<Self> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut literal_start = 0;
        let bytes = text.as_bytes();
        let mut pos = 0;

        while pos < bytes.len() {
            if bytes[pos] != b'%' {
                let next = text[pos..].find('%').map_or(text.len(), |i| pos + i);
                literal.push_str(&text[pos..next]);
                pos = next;
                continue;
            }

            if bytes.get(pos + 1) == Some(&b'%') {
                literal.push('%');
                pos += 2;
                continue;
            }

            if !literal.is_empty() {
                tokens.push(Token::Literal {
                    text: std::mem::take(&mut literal),
                    span: literal_start..pos,
                });
            }

            let (conversion, end) = parse_conversion(text, pos)?;
            tokens.push(Token::Conversion(conversion));
            pos = end;
            literal_start = end;
        }

        if !literal.is_empty() {
            tokens.push(Token::Literal {
                text: literal,
                span: literal_start..text.len(),
            });
        }

        Ok(Self {
            text: text.to_string(),
            tokens,
        })
    }

    /// Returns the original format string text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns the parsed tokens in order.
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Iterates over the typed conversions only.
    pub fn conversions(&self) -> impl Iterator<Item = &Conversion> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Conversion(c) => Some(c),
            Token::Literal { .. } => None,
        })
    }

    /// Returns the byte ranges of the literal runs in the source text.
    #[must_use]
    pub fn literal_spans(&self) -> Vec<Range<usize>> {
        self.tokens
            .iter()
            .filter_map(|t| match t {
                Token::Literal { span, .. } => Some(span.clone()),
                Token::Conversion(_) => None,
            })
            .collect()
    }

    /// Number of argument values the format string consumes.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.conversions().map(Conversion::arity).sum()
    }
}

impl std::fmt::Display for FormatString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

fn parse_conversion(text: &str, start: usize) -> FormatResult<(Conversion, usize)> {
    let bytes = text.as_bytes();
    let mut pos = start + 1;
    let mut flags = Flags::default();

    while let Some(&b) = bytes.get(pos) {
        match b {
            b'-' => flags.left = true,
            b'+' => flags.plus = true,
            b' ' => flags.space = true,
            b'#' => flags.alt = true,
            b'0' => flags.zero = true,
            _ => break,
        }
        pos += 1;
    }

    let width = parse_count(bytes, &mut pos);

    let precision = if bytes.get(pos) == Some(&b'.') {
        pos += 1;
        match parse_count(bytes, &mut pos) {
            Count::None => Count::Fixed(0),
            other => other,
        }
    } else {
        Count::None
    };

    let length = match (bytes.get(pos), bytes.get(pos + 1)) {
        (Some(b'h'), Some(b'h')) => {
            pos += 2;
            Length::Char
        }
        (Some(b'l'), Some(b'l')) => {
            pos += 2;
            Length::LongLong
        }
        (Some(b'h'), _) => {
            pos += 1;
            Length::Short
        }
        (Some(b'l'), _) => {
            pos += 1;
            Length::Long
        }
        (Some(b'q' | b'j' | b'z' | b't'), _) => {
            pos += 1;
            Length::LongLong
        }
        (Some(b'L'), _) => {
            pos += 1;
            Length::LongDouble
        }
        _ => Length::Default,
    };

    let Some(c) = text[pos..].chars().next() else {
        return Err(FormatError::malformed(start, "format string ends inside a conversion"));
    };

    if c == 'n' {
        return Err(FormatError::malformed(start, "%n is not supported"));
    }

    let kind = ConversionKind::from_char(c)
        .ok_or_else(|| FormatError::malformed(start, format!("unknown conversion '%{c}'")))?;

    Ok((
        Conversion {
            flags,
            width,
            precision,
            length,
            kind,
        },
        pos + c.len_utf8(),
    ))
}

fn parse_count(bytes: &[u8], pos: &mut usize) -> Count {
    if bytes.get(*pos) == Some(&b'*') {
        *pos += 1;
        return Count::Star;
    }

    let begin = *pos;
    let mut value = 0usize;
    while let Some(d) = bytes.get(*pos).filter(|b| b.is_ascii_digit()) {
        value = value.saturating_mul(10).saturating_add(usize::from(d - b'0'));
        *pos += 1;
    }

    if *pos == begin {
        Count::None
    } else {
        Count::Fixed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_conversion(text: &str) -> Conversion {
        let fmt = FormatString::parse(text).unwrap();
        let mut conversions = fmt.conversions();
        let c = *conversions.next().unwrap();
        assert!(conversions.next().is_none());
        c
    }

    #[test]
    fn literals_and_conversions() {
        let fmt = FormatString::parse("%s failed with code %d\n").unwrap();
        assert_eq!(fmt.tokens().len(), 4);
        assert_eq!(fmt.arity(), 2);
        assert_eq!(fmt.literal_spans(), vec![2..20, 22..23]);
        assert_eq!(fmt.to_string(), "%s failed with code %d\n");
    }

    #[test]
    fn percent_escape_is_literal() {
        let fmt = FormatString::parse("100%% done").unwrap();
        assert_eq!(fmt.arity(), 0);
        assert_eq!(
            fmt.tokens(),
            &[Token::Literal {
                text: "100% done".into(),
                span: 0..10
            }]
        );
    }

    #[test]
    fn flags_width_precision_length() {
        let c = only_conversion("%-+08.3lld");
        assert!(c.flags.left && c.flags.plus && c.flags.zero);
        assert_eq!(c.width, Count::Fixed(8));
        assert_eq!(c.precision, Count::Fixed(3));
        assert_eq!(c.length, Length::LongLong);
        assert_eq!(c.kind, ConversionKind::Signed);
    }

    #[test]
    fn star_widths_count_as_arguments() {
        let c = only_conversion("%*.*s");
        assert_eq!(c.width, Count::Star);
        assert_eq!(c.precision, Count::Star);
        assert_eq!(c.arity(), 3);
    }

    #[test]
    fn bare_dot_means_zero_precision() {
        assert_eq!(only_conversion("%.f").precision, Count::Fixed(0));
    }

    #[test]
    fn length_modifiers() {
        assert_eq!(only_conversion("%hhu").length, Length::Char);
        assert_eq!(only_conversion("%hx").length, Length::Short);
        assert_eq!(only_conversion("%lu").length, Length::Long);
        assert_eq!(only_conversion("%zu").length, Length::LongLong);
        assert_eq!(only_conversion("%Lf").length, Length::LongDouble);
    }

    #[test]
    fn malformed_strings_fail() {
        for bad in ["%v", "value: %", "%5", "%ln", "%-"] {
            let err = FormatString::parse(bad).unwrap_err();
            assert!(matches!(err, FormatError::Malformed { .. }), "{bad}");
        }
    }

    #[test]
    fn malformed_reports_position() {
        let err = FormatString::parse("ok %d then %v").unwrap_err();
        assert_eq!(err, FormatError::malformed(11, "unknown conversion '%v'"));
    }
}
