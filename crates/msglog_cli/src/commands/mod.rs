//! CLI command implementations.

pub mod cat;
pub mod collect;
pub mod inspect;
pub mod registry;
pub mod roll;
pub mod send;

use clap::ValueEnum;
use msglog_core::LogReader;
use serde::Serialize;

/// Output format shared by the read-only commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Prints `value` as pretty JSON.
pub(crate) fn print_json(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Picks a user id from `--uid` or `--user`; with neither, the only user
/// with a log.
pub(crate) fn resolve_uid(
    reader: &LogReader,
    uid: Option<u16>,
    user: Option<&str>,
) -> Result<u16, Box<dyn std::error::Error>> {
    if let Some(uid) = uid {
        return Ok(uid);
    }
    let users = reader.users()?;
    if let Some(name) = user {
        return users
            .get(name)
            .copied()
            .ok_or_else(|| format!("No log for user {name:?}").into());
    }
    let mut uids = users.values().copied();
    match (uids.next(), uids.next()) {
        (Some(uid), None) => Ok(uid),
        (None, _) => Err("No user logs found".into()),
        _ => Err(format!(
            "Several users have logs ({}); pass --uid or --user",
            users.keys().cloned().collect::<Vec<_>>().join(", ")
        )
        .into()),
    }
}

/// Formats a byte count for display.
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
