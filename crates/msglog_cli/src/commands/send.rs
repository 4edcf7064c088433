//! Send command implementation.

use crate::SendArgs;
use msglog_format::{Arg, ConversionKind, FormatString};
use msglog_forwarder::{Forwarder, ForwarderConfig, LogDispatch};
use msglog_protocol::{MessageSource, Priority, ProtocolVersion};
use std::time::{Duration, Instant};
use tracing::debug;

/// How long to wait for the message to reach the collector.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends one message to a collector and waits until it is written out.
pub fn run(args: &SendArgs) -> Result<(), Box<dyn std::error::Error>> {
    let priority: Priority = args.severity.parse()?;
    let format = FormatString::parse(&args.format_string)?;
    let values = convert_args(&format, &args.args)?;

    let uid = args.uid.unwrap_or_else(current_uid);
    let forwarder = Forwarder::new(ForwarderConfig::new(&args.component).with_uid(uid))?;
    forwarder.add_collector(args.collector, ProtocolVersion::CURRENT)?;
    if let Some(app_id) = args.app_id {
        forwarder.register_app_id(app_id);
    }

    match forwarder.log(
        priority,
        &args.category,
        MessageSource::Cpp,
        &args.format_string,
        &values,
        None,
    ) {
        LogDispatch::Forwarded(_) => {}
        other => return Err(format!("Message not sent: {other:?}").into()),
    }

    let deadline = Instant::now() + SEND_TIMEOUT;
    let result = loop {
        let now = Instant::now();
        if let Some((addr, reason)) = forwarder.service(now).into_iter().next() {
            break Err(format!("Collector {addr} dropped: {reason:?}"));
        }
        if forwarder.pending() == 0 {
            break Ok(());
        }
        if now >= deadline {
            break Err(format!("Timed out sending to {}", args.collector));
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    forwarder.del_collector(args.collector);
    result?;
    debug!(collector = %args.collector, "message sent");
    Ok(())
}

/// Converts command-line strings to arguments according to the format
/// string's conversions. `*` widths and precisions take an integer each.
pub(crate) fn convert_args(format: &FormatString, raw: &[String]) -> Result<Vec<Arg>, String> {
    if raw.len() != format.arity() {
        return Err(format!(
            "Format string takes {} arguments, got {}",
            format.arity(),
            raw.len()
        ));
    }

    let mut raw = raw.iter();
    let mut next = || raw.next().map(String::as_str).unwrap_or_default();
    let mut values = Vec::with_capacity(format.arity());
    for conversion in format.conversions() {
        if conversion.width.is_star() {
            values.push(Arg::Int(parse_int(next())?));
        }
        if conversion.precision.is_star() {
            values.push(Arg::Int(parse_int(next())?));
        }
        let text = next();
        let value = match conversion.kind {
            ConversionKind::Signed => Arg::Int(parse_int(text)?),
            ConversionKind::Unsigned | ConversionKind::Octal | ConversionKind::Hex { .. } => {
                Arg::UInt(text.parse().map_err(|_| format!("{text:?} is not an unsigned integer"))?)
            }
            ConversionKind::Fixed { .. }
            | ConversionKind::Exponent { .. }
            | ConversionKind::General { .. } => {
                Arg::Float(text.parse().map_err(|_| format!("{text:?} is not a number"))?)
            }
            ConversionKind::Str => Arg::Str(text.to_string()),
            ConversionKind::Char => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Arg::Char(c),
                    _ => return Err(format!("{text:?} is not a single character")),
                }
            }
            ConversionKind::Pointer => {
                let digits = text.trim_start_matches("0x");
                Arg::Ptr(u64::from_str_radix(digits, 16).map_err(|_| format!("{text:?} is not a pointer"))?)
            }
        };
        values.push(value);
    }
    Ok(values)
}

fn parse_int(text: &str) -> Result<i64, String> {
    text.parse().map_err(|_| format!("{text:?} is not an integer"))
}

#[cfg(unix)]
fn current_uid() -> u16 {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self").map_or(0, |m| m.uid() as u16)
}

#[cfg(not(unix))]
fn current_uid() -> u16 {
    0
}
