//! C `printf` rendering of decoded values.
//!
//! Widths and precisions are counted in characters rather than bytes, which
//! matches C for ASCII text.

use crate::arg::Arg;
use crate::stream::Decoded;
use crate::token::{Conversion, ConversionKind, Flags, Length};
use std::fmt::{self, Write};

/// Renders one decoded conversion into `out`.
pub(crate) fn render(out: &mut impl Write, conversion: &Conversion, decoded: &Decoded) -> fmt::Result {
    let mut flags = conversion.flags;
    let width = match decoded.width {
        Some(w) if w < 0 => {
            flags.left = true;
            w.unsigned_abs() as usize
        }
        Some(w) => w as usize,
        None => 0,
    };
    let precision = decoded.precision.filter(|p| *p >= 0).map(|p| p as usize);

    match conversion.kind {
        ConversionKind::Signed => {
            let v = truncate_signed(as_i64(&decoded.value), conversion.length);
            let sign = if v < 0 {
                "-"
            } else if flags.plus {
                "+"
            } else if flags.space {
                " "
            } else {
                ""
            };
            let digits = with_precision(v.unsigned_abs().to_string(), v == 0, precision);
            pad_numeric(out, sign, &digits, width, flags, precision.is_none())
        }
        ConversionKind::Unsigned | ConversionKind::Octal | ConversionKind::Hex { .. } => {
            let v = truncate_unsigned(as_u64(&decoded.value), conversion.length);
            let (prefix, digits) = match conversion.kind {
                ConversionKind::Octal => {
                    let mut digits = with_precision(format!("{v:o}"), v == 0, precision);
                    if flags.alt && !digits.starts_with('0') {
                        digits.insert(0, '0');
                    }
                    ("", digits)
                }
                ConversionKind::Hex { upper } => {
                    let raw = if upper { format!("{v:X}") } else { format!("{v:x}") };
                    let prefix = match (flags.alt && v != 0, upper) {
                        (true, true) => "0X",
                        (true, false) => "0x",
                        (false, _) => "",
                    };
                    (prefix, with_precision(raw, v == 0, precision))
                }
                _ => ("", with_precision(v.to_string(), v == 0, precision)),
            };
            pad_numeric(out, prefix, &digits, width, flags, precision.is_none())
        }
        ConversionKind::Fixed { upper }
        | ConversionKind::Exponent { upper }
        | ConversionKind::General { upper } => {
            let v = as_f64(&decoded.value);
            let sign = if v.is_sign_negative() && !v.is_nan() {
                "-"
            } else if flags.plus {
                "+"
            } else if flags.space {
                " "
            } else {
                ""
            };
            let abs = v.abs();
            if !abs.is_finite() {
                let text = match (abs.is_nan(), upper) {
                    (true, false) => "nan",
                    (true, true) => "NAN",
                    (false, false) => "inf",
                    (false, true) => "INF",
                };
                return pad_numeric(out, sign, text, width, flags, false);
            }
            let precision = precision.unwrap_or(6);
            let body = match conversion.kind {
                ConversionKind::Fixed { .. } => fixed(abs, precision, flags.alt),
                ConversionKind::Exponent { .. } => exponent(abs, precision, upper, flags.alt),
                _ => general(abs, precision, upper, flags.alt),
            };
            pad_numeric(out, sign, &body, width, flags, true)
        }
        ConversionKind::Str => {
            let text = match &decoded.value {
                Arg::Str(s) => s.as_str(),
                _ => "",
            };
            match precision {
                Some(max) => {
                    let end = text.char_indices().nth(max).map_or(text.len(), |(i, _)| i);
                    pad_text(out, &text[..end], width, flags)
                }
                None => pad_text(out, text, width, flags),
            }
        }
        ConversionKind::Char => {
            let code = as_i64(&decoded.value);
            let c = u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .unwrap_or(char::REPLACEMENT_CHARACTER);
            let mut tmp = [0u8; 4];
            pad_text(out, c.encode_utf8(&mut tmp), width, flags)
        }
        ConversionKind::Pointer => {
            let v = as_u64(&decoded.value);
            if v == 0 {
                pad_text(out, "(nil)", width, flags)
            } else {
                pad_text(out, &format!("0x{v:x}"), width, flags)
            }
        }
    }
}

fn as_i64(arg: &Arg) -> i64 {
    match arg {
        Arg::Int(v) => *v,
        Arg::UInt(v) | Arg::Ptr(v) => *v as i64,
        Arg::Float(v) => *v as i64,
        Arg::Char(c) => i64::from(u32::from(*c)),
        Arg::Str(_) => 0,
    }
}

fn as_u64(arg: &Arg) -> u64 {
    match arg {
        Arg::UInt(v) | Arg::Ptr(v) => *v,
        other => as_i64(other) as u64,
    }
}

fn as_f64(arg: &Arg) -> f64 {
    match arg {
        Arg::Float(v) => *v,
        Arg::UInt(v) => *v as f64,
        other => as_i64(other) as f64,
    }
}

fn truncate_signed(v: i64, length: Length) -> i64 {
    match length {
        Length::Char => i64::from(v as i8),
        Length::Short => i64::from(v as i16),
        Length::Long | Length::LongLong => v,
        Length::Default | Length::LongDouble => i64::from(v as i32),
    }
}

fn truncate_unsigned(v: u64, length: Length) -> u64 {
    match length {
        Length::Char => u64::from(v as u8),
        Length::Short => u64::from(v as u16),
        Length::Long | Length::LongLong => v,
        Length::Default | Length::LongDouble => u64::from(v as u32),
    }
}

/// Applies integer precision: a minimum digit count, where `.0` prints
/// nothing for a zero value.
fn with_precision(digits: String, is_zero: bool, precision: Option<usize>) -> String {
    match precision {
        Some(0) if is_zero => String::new(),
        Some(p) if p > digits.len() => {
            let mut padded = "0".repeat(p - digits.len());
            padded.push_str(&digits);
            padded
        }
        _ => digits,
    }
}

fn pad_numeric(
    out: &mut impl Write,
    prefix: &str,
    body: &str,
    width: usize,
    flags: Flags,
    zero_allowed: bool,
) -> fmt::Result {
    let len = prefix.chars().count() + body.chars().count();
    if len >= width {
        out.write_str(prefix)?;
        return out.write_str(body);
    }
    let fill = width - len;
    if flags.left {
        out.write_str(prefix)?;
        out.write_str(body)?;
        write_repeat(out, ' ', fill)
    } else if flags.zero && zero_allowed {
        out.write_str(prefix)?;
        write_repeat(out, '0', fill)?;
        out.write_str(body)
    } else {
        write_repeat(out, ' ', fill)?;
        out.write_str(prefix)?;
        out.write_str(body)
    }
}

fn pad_text(out: &mut impl Write, text: &str, width: usize, flags: Flags) -> fmt::Result {
    let len = text.chars().count();
    if len >= width {
        return out.write_str(text);
    }
    if flags.left {
        out.write_str(text)?;
        write_repeat(out, ' ', width - len)
    } else {
        write_repeat(out, ' ', width - len)?;
        out.write_str(text)
    }
}

fn write_repeat(out: &mut impl Write, c: char, n: usize) -> fmt::Result {
    for _ in 0..n {
        out.write_char(c)?;
    }
    Ok(())
}

fn fixed(abs: f64, precision: usize, alt: bool) -> String {
    let mut s = format!("{abs:.precision$}");
    if alt && precision == 0 {
        s.push('.');
    }
    s
}

/// Splits Rust's `{:e}` output into mantissa and exponent.
fn split_exponent(abs: f64, precision: usize) -> (String, i32) {
    let s = format!("{abs:.precision$e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => (mantissa.to_string(), exp.parse().unwrap_or(0)),
        None => (s, 0),
    }
}

fn with_exponent(mut mantissa: String, exp: i32, upper: bool) -> String {
    mantissa.push(if upper { 'E' } else { 'e' });
    mantissa.push(if exp < 0 { '-' } else { '+' });
    let _ = write!(mantissa, "{:02}", exp.unsigned_abs());
    mantissa
}

fn exponent(abs: f64, precision: usize, upper: bool, alt: bool) -> String {
    let (mut mantissa, exp) = split_exponent(abs, precision);
    if alt && precision == 0 {
        mantissa.push('.');
    }
    with_exponent(mantissa, exp, upper)
}

fn general(abs: f64, precision: usize, upper: bool, alt: bool) -> String {
    let p = precision.max(1);
    let x = if abs == 0.0 {
        0
    } else {
        split_exponent(abs, p - 1).1
    };

    if (x as i64) < p as i64 && x >= -4 {
        let decimals = (p as i64 - 1 - i64::from(x)) as usize;
        let mut s = fixed(abs, decimals, alt);
        if !alt {
            strip_fraction_zeros(&mut s);
        }
        s
    } else {
        let (mut mantissa, exp) = split_exponent(abs, p - 1);
        if alt {
            if !mantissa.contains('.') {
                mantissa.push('.');
            }
        } else {
            strip_fraction_zeros(&mut mantissa);
        }
        with_exponent(mantissa, exp, upper)
    }
}

fn strip_fraction_zeros(s: &mut String) {
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
}
