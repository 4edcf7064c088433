//! Registry listing commands: users, strings, hostnames, components and
//! categories.

use crate::commands::{print_json, resolve_uid, OutputFormat};
use msglog_core::LogReader;
use serde::Serialize;
use std::path::Path;

/// A user with a log.
#[derive(Debug, Serialize)]
pub struct UserInfo {
    /// User name.
    pub name: String,
    /// User id.
    pub uid: u16,
}

/// A known host.
#[derive(Debug, Serialize)]
pub struct HostInfo {
    /// Dotted IPv4 address.
    pub address: String,
    /// Resolved name.
    pub name: String,
}

/// A component that logged to a user's log.
#[derive(Debug, Serialize)]
pub struct ComponentInfo {
    /// Component id within the user's log.
    pub id: u32,
    /// Display label, e.g. `CellApp01`.
    pub label: String,
    /// Host name.
    pub host: String,
    /// Process id.
    pub pid: u32,
    /// App instance id.
    pub app_id: u32,
    /// Address of the first entry.
    pub first_entry: String,
}

/// Lists users with logs.
pub fn users(logdir: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let reader = LogReader::open(logdir)?;
    let users: Vec<UserInfo> = reader
        .users()?
        .into_iter()
        .map(|(name, uid)| UserInfo { name, uid })
        .collect();

    match format {
        OutputFormat::Json => print_json(&users)?,
        OutputFormat::Text => {
            for user in &users {
                println!("{:>6}  {}", user.uid, user.name);
            }
        }
    }
    Ok(())
}

/// Lists every format string, sorted.
pub fn strings(logdir: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let reader = LogReader::open(logdir)?;
    let strings = reader.format_strings();
    match format {
        OutputFormat::Json => print_json(&strings)?,
        OutputFormat::Text => {
            for s in &strings {
                println!("{s}");
            }
        }
    }
    Ok(())
}

/// Lists known hosts.
pub fn hostnames(logdir: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let reader = LogReader::open(logdir)?;
    let hosts: Vec<HostInfo> = reader
        .hostnames()
        .into_iter()
        .map(|(addr, name)| HostInfo {
            address: addr.to_string(),
            name,
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&hosts)?,
        OutputFormat::Text => {
            for host in &hosts {
                println!("{:<16} {}", host.address, host.name);
            }
        }
    }
    Ok(())
}

/// Lists the components of one user's log.
pub fn components(
    logdir: &Path,
    uid: Option<u16>,
    user: Option<&str>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let reader = LogReader::open(logdir)?;
    let uid = resolve_uid(&reader, uid, user)?;
    let log = reader.user_log(uid)?;

    let components: Vec<ComponentInfo> = log
        .components()
        .into_iter()
        .map(|c| {
            let host = match c.addr.ip() {
                std::net::IpAddr::V4(ip) => reader.hostname(ip).unwrap_or_else(|| ip.to_string()),
                ip => ip.to_string(),
            };
            ComponentInfo {
                id: c.id,
                label: c.label(),
                host,
                pid: c.pid(),
                app_id: c.app_id,
                first_entry: c.first_entry.to_string(),
            }
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&components)?,
        OutputFormat::Text => {
            println!("Components of {} ({})", log.username(), uid);
            println!("==========================================");
            for c in &components {
                println!(
                    "{:>4}  {:<12} {:<16} pid {:<7} first {}",
                    c.id, c.label, c.host, c.pid, c.first_entry
                );
            }
        }
    }
    Ok(())
}

/// Lists categories.
pub fn categories(logdir: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let reader = LogReader::open(logdir)?;
    let categories = reader.categories();
    match format {
        OutputFormat::Json => print_json(&categories)?,
        OutputFormat::Text => {
            for name in &categories {
                println!("{name}");
            }
        }
    }
    Ok(())
}
