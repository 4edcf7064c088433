//! Cat command implementation.

use crate::commands::{print_json, resolve_uid, OutputFormat};
use crate::{CatArgs, InterpolateArg};
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use msglog_core::{Direction, EntryAddress, Interpolation, LogReader, LogTime, QueryItem, QueryParams};
use msglog_protocol::{MessageSource, Priority};
use std::path::Path;
use std::time::Duration;

/// How long `--follow` sleeps between polls.
const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

/// Runs the cat command.
pub fn run(logdir: &Path, args: &CatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let reader = LogReader::open(logdir)?;
    let uid = resolve_uid(&reader, args.uid, args.user.as_deref())?;
    let log = reader.user_log(uid)?;
    let params = build_params(&reader, args)?;

    let mut query = reader.query(&log, &params)?;
    let mut items = Vec::new();
    loop {
        for item in query.by_ref() {
            let item = item?;
            match args.format {
                OutputFormat::Json => items.push(item),
                OutputFormat::Text => print_item(&item),
            }
        }
        if !args.follow {
            break;
        }
        std::thread::sleep(FOLLOW_INTERVAL);
        query.resume()?;
    }

    if args.format == OutputFormat::Json {
        print_json(&items)?;
    }
    Ok(())
}

fn print_item(item: &QueryItem) {
    match item {
        QueryItem::Match(result) => println!("{}", result.format_line()),
        QueryItem::Context(result) => println!("  {}", result.format_line()),
        QueryItem::Separator => println!("--"),
    }
}

/// Translates command-line options into query parameters.
pub(crate) fn build_params(
    reader: &LogReader,
    args: &CatArgs,
) -> Result<QueryParams, Box<dyn std::error::Error>> {
    let mut params = QueryParams::new()
        .with_casesens(!args.ignore_case)
        .with_context(args.context)
        .with_interpolate(match args.interpolate {
            InterpolateArg::Pre => Interpolation::Pre,
            InterpolateArg::Post => Interpolation::Post,
            InterpolateArg::Dont => Interpolation::Dont,
        });

    if args.backwards {
        params = params.with_direction(Direction::Backwards);
    }
    if let Some(from) = &args.from {
        params.start = parse_time(from)?;
    }
    if let Some(to) = &args.to {
        params.end = parse_time(to)?;
    }
    if let Some(addr) = &args.from_address {
        params = params.with_start_address(addr.parse::<EntryAddress>()?);
    }
    if let Some(addr) = &args.to_address {
        params = params.with_end_address(addr.parse::<EntryAddress>()?);
    }
    if let Some(period) = &args.period {
        params = params.with_period(period.clone());
    }

    if let Some(host) = &args.host {
        params = params.with_host(host.clone(), args.negate);
    }
    if let Some(pid) = args.pid {
        params = params.with_pid(pid, args.negate);
    }
    if let Some(app_id) = args.app_id {
        params = params.with_app_id(app_id, args.negate);
    }

    if !args.components.is_empty() {
        let mut mask = 0u32;
        for name in &args.components {
            let type_id = reader
                .component_type_id(name)
                .ok_or_else(|| format!("Unknown component {name:?}"))?;
            mask |= 1u32.checked_shl(u32::from(type_id)).unwrap_or(0);
        }
        params = params.with_procs(mask);
    }

    if !args.severities.is_empty() {
        let priorities = args
            .severities
            .iter()
            .map(|s| s.parse::<Priority>())
            .collect::<Result<Vec<_>, _>>()?;
        params = params.with_priorities(&priorities);
    }

    if !args.categories.is_empty() {
        params = params.with_categories(args.categories.iter().cloned());
    }
    if args.script_only {
        params = params.with_sources(MessageSource::Script.mask());
    } else if args.native_only {
        params = params.with_sources(MessageSource::Cpp.mask());
    }
    if let Some(pattern) = &args.include {
        params = params.with_include(pattern.clone());
    }
    if let Some(pattern) = &args.exclude {
        params = params.with_exclude(pattern.clone());
    }

    Ok(params)
}

/// Parses seconds since the epoch, or a local `YYYY-MM-DD[ HH:MM[:SS]]`.
pub(crate) fn parse_time(text: &str) -> Result<LogTime, Box<dyn std::error::Error>> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<f64>() {
        return Ok(LogTime::from_secs_f64(secs));
    }

    let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("Cannot parse time {text:?}"))?;

    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| format!("{text:?} does not exist in the local time zone"))?;
    Ok(LogTime::from_secs_f64(local.timestamp_millis() as f64 / 1000.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_seconds() {
        assert_eq!(parse_time("1000.5").unwrap(), LogTime::new(1000, 500));
        assert_eq!(parse_time(" 0 ").unwrap(), LogTime::BEGIN);
    }

    #[test]
    fn local_dates() {
        let full = parse_time("2026-10-19 12:30:15").unwrap();
        let minutes = parse_time("2026-10-19 12:30").unwrap();
        let day = parse_time("2026-10-19").unwrap();
        assert_eq!(full.as_secs_f64() - minutes.as_secs_f64(), 15.0);
        assert!(day < minutes);
    }

    #[test]
    fn garbage_rejected() {
        assert!(parse_time("yesterday").is_err());
    }
}
