//! Address to hostname registry.

use super::{Registry, RegistryRecord};
use crate::dir::HOSTNAMES_FILE;
use crate::error::{CoreError, CoreResult};
use bytes::BufMut;
use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use tracing::debug;

/// Turns an address into a hostname.
pub trait HostResolver: Send + Sync {
    /// The name of `addr`, or `None` if it cannot be resolved.
    fn resolve(&self, addr: Ipv4Addr) -> Option<String>;
}

/// Resolves through `/etc/hosts`, and loopback addresses to this
/// machine's name.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, addr: Ipv4Addr) -> Option<String> {
        if let Some(name) = hosts_file_lookup(Path::new("/etc/hosts"), addr) {
            if !(addr.is_loopback() && name == "localhost") {
                return Some(name);
            }
        }
        if addr.is_loopback() {
            return hostname::get().ok()?.into_string().ok();
        }
        None
    }
}

fn hosts_file_lookup(path: &Path, addr: Ipv4Addr) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    text.lines().find_map(|line| {
        let line = line.split('#').next()?;
        let mut fields = line.split_whitespace();
        let ip: IpAddr = fields.next()?.parse().ok()?;
        (ip == IpAddr::V4(addr)).then(|| fields.next().map(str::to_string))?
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HostRecord {
    addr: Ipv4Addr,
    name: String,
}

impl RegistryRecord for HostRecord {
    fn encode(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        buf.put_slice(&self.addr.octets());
        buf.put_slice(self.name.as_bytes());
        Ok(())
    }

    fn decode(payload: &[u8]) -> CoreResult<Self> {
        if payload.len() < 4 {
            return Err(CoreError::registry_corruption(HOSTNAMES_FILE, "short record"));
        }
        let name = String::from_utf8(payload[4..].to_vec())
            .map_err(|e| CoreError::registry_corruption(HOSTNAMES_FILE, e.to_string()))?;
        Ok(Self {
            addr: Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]),
            name,
        })
    }
}

/// Hostnames of every address that has logged.
///
/// An address is resolved once, on first sight. If resolution fails the
/// dotted-decimal form is stored, so it is never retried.
#[derive(Debug)]
pub struct Hostnames {
    registry: Registry<HostRecord>,
    by_addr: HashMap<Ipv4Addr, String>,
}

impl Hostnames {
    /// Opens `hostnames` in `root` for writing.
    pub fn open(root: &Path) -> CoreResult<Self> {
        Ok(Self::index(Registry::open(&root.join(HOSTNAMES_FILE))?))
    }

    /// Opens `hostnames` in `root` for reading.
    pub fn open_read_only(root: &Path) -> CoreResult<Self> {
        Ok(Self::index(Registry::open_read_only(&root.join(HOSTNAMES_FILE))?))
    }

    fn index(registry: Registry<HostRecord>) -> Self {
        let mut hosts = Self {
            registry,
            by_addr: HashMap::new(),
        };
        hosts.index_from(0);
        hosts
    }

    fn index_from(&mut self, first: usize) {
        for (_, record) in &self.registry.records()[first..] {
            self.by_addr.insert(record.addr, record.name.clone());
        }
    }

    /// Name of `addr`, resolving and storing it on first sight.
    pub fn resolve(&mut self, addr: Ipv4Addr, resolver: &dyn HostResolver) -> CoreResult<&str> {
        if !self.by_addr.contains_key(&addr) {
            let name = resolver.resolve(addr).unwrap_or_else(|| addr.to_string());
            debug!(%addr, %name, "registered host");
            self.registry.append(HostRecord {
                addr,
                name: name.clone(),
            })?;
            self.by_addr.insert(addr, name);
        }
        Ok(self.by_addr.get(&addr).map_or("", String::as_str))
    }

    /// Stored name of `addr`.
    #[must_use]
    pub fn name(&self, addr: Ipv4Addr) -> Option<&str> {
        self.by_addr.get(&addr).map(String::as_str)
    }

    /// Address of a stored hostname. Dotted-decimal input is accepted as
    /// long as that address has logged.
    #[must_use]
    pub fn address_for_host(&self, host: &str) -> Option<Ipv4Addr> {
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            return self.by_addr.contains_key(&addr).then_some(addr);
        }
        self.by_addr
            .iter()
            .find(|(_, name)| name.as_str() == host)
            .map(|(addr, _)| *addr)
    }

    /// All (address, name) pairs, sorted by name.
    #[must_use]
    pub fn all(&self) -> Vec<(Ipv4Addr, String)> {
        let mut all: Vec<_> = self.by_addr.iter().map(|(a, n)| (*a, n.clone())).collect();
        all.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        all
    }

    /// Picks up hosts added by the writer.
    pub fn refresh(&mut self) -> CoreResult<()> {
        let first = self.registry.refresh()?;
        self.index_from(first);
        Ok(())
    }
}
