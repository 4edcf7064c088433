//! Inspect command implementation.

use crate::commands::{format_size, print_json, OutputFormat};
use msglog_core::{read_active_files, LogReader, LogTime, PidLock};
use serde::Serialize;
use std::path::Path;

/// Log directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log directory path.
    pub path: String,
    /// On-disk format version.
    pub version: u32,
    /// Pid holding the collector lock, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<u32>,
    /// Segments currently being written, as `user/suffix`.
    pub active_files: Vec<String>,
    /// Number of format strings.
    pub format_strings: usize,
    /// Number of known hosts.
    pub hosts: usize,
    /// Per-user statistics.
    pub users: Vec<UserStats>,
}

/// Statistics for one user's log.
#[derive(Debug, Serialize)]
pub struct UserStats {
    /// User name.
    pub name: String,
    /// User id.
    pub uid: u16,
    /// Number of components.
    pub components: usize,
    /// Total entries across segments.
    pub entries: u64,
    /// Total bytes across segments.
    pub size: u64,
    /// Segments, oldest first.
    pub segments: Vec<SegmentStats>,
}

/// Statistics for a single segment.
#[derive(Debug, Serialize)]
pub struct SegmentStats {
    /// Segment suffix.
    pub suffix: String,
    /// Number of entries.
    pub entries: u32,
    /// Entry and argument bytes.
    pub size: u64,
    /// Time of the first entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<LogTime>,
    /// Time of the last entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<LogTime>,
}

/// Runs the inspect command.
pub fn run(logdir: &Path, uid: Option<u16>, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let reader = LogReader::open(logdir)?;

    let mut result = InspectResult {
        path: logdir.display().to_string(),
        version: reader.version(),
        locked_by: PidLock::owner(logdir),
        active_files: read_active_files(logdir)?,
        format_strings: reader.format_strings().len(),
        hosts: reader.hostnames().len(),
        users: Vec::new(),
    };

    for (name, user_uid) in reader.users()? {
        if uid.is_some_and(|u| u != user_uid) {
            continue;
        }
        let log = reader.user_log(user_uid)?;
        let mut stats = UserStats {
            name,
            uid: user_uid,
            components: log.components().len(),
            entries: 0,
            size: 0,
            segments: Vec::new(),
        };
        for segment in log.segments() {
            let seg = SegmentStats {
                suffix: segment.suffix().to_string(),
                entries: segment.len()?,
                size: segment.byte_size()?,
                start: segment.start_time()?,
                end: segment.end_time()?,
            };
            stats.entries += u64::from(seg.entries);
            stats.size += seg.size;
            stats.segments.push(seg);
        }
        result.users.push(stats);
    }

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_text(&result),
    }
    Ok(())
}

fn print_text(result: &InspectResult) {
    println!("Message Log Inspection");
    println!("======================");
    println!();
    println!("Path:           {}", result.path);
    println!("Format version: {}", result.version);
    match result.locked_by {
        Some(pid) => println!("Collector:      pid {pid}"),
        None => println!("Collector:      not running"),
    }
    println!("Format strings: {}", result.format_strings);
    println!("Hosts:          {}", result.hosts);

    if !result.active_files.is_empty() {
        println!();
        println!("Active files:");
        for file in &result.active_files {
            println!("  {file}");
        }
    }

    for user in &result.users {
        println!();
        println!(
            "{} ({}): {} entries, {}, {} components",
            user.name,
            user.uid,
            user.entries,
            format_size(user.size),
            user.components
        );
        for seg in &user.segments {
            let span = match (seg.start, seg.end) {
                (Some(start), Some(end)) => format!("{start} .. {end}"),
                _ => "empty".to_string(),
            };
            println!(
                "  {:<22} {:>8} entries {:>12}  {}",
                seg.suffix,
                seg.entries,
                format_size(seg.size),
                span
            );
        }
    }
}
