//! Filtered queries over a user's log.
//!
//! A [`Query`] drives a [`QueryRange`] and evaluates every entry against
//! the [`QueryParams`] filters. Entries that fail a filter are skipped
//! without ending the scan; an entry whose arguments cannot be replayed
//! is logged and skipped too.
//!
//! ```no_run
//! use msglog_core::{LogReader, QueryParams};
//! use msglog_protocol::Priority;
//!
//! let reader = LogReader::open("/var/log/msglog")?;
//! let log = reader.user_log(1000)?;
//! let params = QueryParams::new().with_priorities(&[Priority::Error]);
//! for item in reader.query(&log, &params)? {
//!     if let Some(result) = item?.result() {
//!         println!("{}", result.format_line());
//!     }
//! }
//! # Ok::<(), msglog_core::CoreError>(())
//! ```

mod params;
mod range;
mod result;

pub use params::{Interpolation, QueryParams, PERIOD_TO_BEGINNING, PERIOD_TO_PRESENT};
pub use range::QueryRange;
pub use result::{QueryItem, QueryResult};

use crate::entry::LogEntry;
use crate::error::{CoreError, CoreResult};
use crate::reader::LogReader;
use crate::registry::ComponentRecord;
use crate::types::{Direction, EntryAddress};
use crate::user_log::UserLogReader;
use msglog_protocol::Metadata;
use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use tracing::warn;

/// Predicates compiled from [`QueryParams`].
#[derive(Debug)]
struct Filter {
    host: Option<(Ipv4Addr, bool)>,
    pid: Option<(u32, bool)>,
    app_id: Option<(u32, bool)>,
    procs: u32,
    severities: u32,
    sources: u32,
    /// `None` matches every category.
    categories: Option<HashSet<u16>>,
    include: Option<Regex>,
    exclude: Option<Regex>,
}

fn compile(pattern: &str, casesens: bool) -> CoreResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(!casesens)
        .build()
        .map_err(|e| CoreError::invalid_regex(pattern, &e))
}

impl Filter {
    fn new(reader: &LogReader, params: &QueryParams) -> CoreResult<Self> {
        let host = match params.host.as_deref().filter(|h| !h.is_empty()) {
            Some(host) => {
                let addr = reader
                    .address_for_host(host)
                    .ok_or_else(|| CoreError::UnknownHost { host: host.to_string() })?;
                Some((addr, params.negate_host))
            }
            None => None,
        };

        // unknown category names never match anything
        let categories = (!params.categories.is_empty()).then(|| {
            params
                .categories
                .iter()
                .filter_map(|name| reader.category_id(name))
                .collect()
        });

        Ok(Self {
            host,
            pid: params.pid.map(|pid| (pid, params.negate_pid)),
            app_id: params.app_id.map(|id| (id, params.negate_app_id)),
            procs: params.procs,
            severities: params.severities,
            sources: params.sources,
            categories,
            include: params
                .include
                .as_deref()
                .map(|p| compile(p, params.casesens))
                .transpose()?,
            exclude: params
                .exclude
                .as_deref()
                .map(|p| compile(p, params.casesens))
                .transpose()?,
        })
    }

    fn entry_matches(&self, entry: &LogEntry, component: Option<&ComponentRecord>) -> bool {
        if self.severities & entry.priority.mask() == 0 || self.sources & entry.source.mask() == 0 {
            return false;
        }
        if let Some(categories) = &self.categories {
            if !categories.contains(&entry.category_id) {
                return false;
            }
        }

        let needs_component = self.host.is_some()
            || self.pid.is_some()
            || self.app_id.is_some()
            || self.procs != u32::MAX;
        let Some(component) = component else {
            return !needs_component;
        };

        if let Some((addr, negate)) = self.host {
            if (component.addr.ip() == IpAddr::V4(addr)) == negate {
                return false;
            }
        }
        if let Some((pid, negate)) = self.pid {
            if (component.pid() == pid) == negate {
                return false;
            }
        }
        if let Some((app_id, negate)) = self.app_id {
            if (component.app_id == app_id) == negate {
                return false;
            }
        }
        let type_bit = 1u32.checked_shl(u32::from(component.type_id)).unwrap_or(0);
        self.procs & type_bit != 0
    }

    fn text_matches(&self, text: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(text) {
                return false;
            }
        }
        match &self.exclude {
            Some(exclude) => !exclude.is_match(text),
            None => true,
        }
    }
}

/// A running query. Iterate it for [`QueryItem`]s.
pub struct Query<'a> {
    reader: &'a LogReader,
    log: &'a UserLogReader,
    range: QueryRange<'a>,
    filter: Filter,
    interpolate: Interpolation,
    context: usize,
    components: HashMap<u32, Option<ComponentRecord>>,
    /// Recent non-matching entries, kept as leading context.
    before: VecDeque<(u64, QueryResult)>,
    /// Context lines still owed after the last match.
    after: usize,
    last_emitted: Option<u64>,
    ready: VecDeque<QueryItem>,
}

impl std::fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("range", &self.range)
            .field("filter", &self.filter)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl<'a> Query<'a> {
    /// Starts a query. See [`LogReader::query`].
    pub fn new(reader: &'a LogReader, log: &'a UserLogReader, params: &QueryParams) -> CoreResult<Self> {
        let filter = Filter::new(reader, params)?;
        let range = QueryRange::new(log, params)?;
        Ok(Self {
            reader,
            log,
            range,
            filter,
            interpolate: params.interpolate,
            context: params.context,
            components: HashMap::new(),
            before: VecDeque::new(),
            after: 0,
            last_emitted: None,
            ready: VecDeque::new(),
        })
    }

    /// The underlying range, for seeking and progress.
    #[must_use]
    pub fn range(&self) -> &QueryRange<'a> {
        &self.range
    }

    /// Mutable access to the underlying range.
    pub fn range_mut(&mut self) -> &mut QueryRange<'a> {
        &mut self.range
    }

    /// Effective iteration direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.range.direction()
    }

    /// Picks up entries written since the query started.
    pub fn resume(&mut self) -> CoreResult<()> {
        self.reader.refresh()?;
        self.range.resume()
    }

    fn component(&mut self, id: u32) -> CoreResult<Option<ComponentRecord>> {
        if let Some(Some(found)) = self.components.get(&id) {
            return Ok(Some(found.clone()));
        }
        let mut found = self.log.component(id);
        if found.is_none() {
            // the writer records a component just after its first entry
            self.log.refresh()?;
            found = self.log.component(id);
        }
        self.components.insert(id, found.clone());
        Ok(found)
    }

    /// Reads the next entry and resolves it. Returns `None` when the range
    /// is exhausted, and `Some((pos, None))` for an entry that could not be
    /// resolved.
    fn next_entry(&mut self) -> CoreResult<Option<(u64, Option<(bool, QueryResult)>)>> {
        let Some((address, entry)) = self.range.get_next_entry()? else {
            return Ok(None);
        };
        let pos = self.range.last_position().unwrap_or_default();

        let component = self.component(entry.component_id)?;
        let passes = self.filter.entry_matches(&entry, component.as_ref());
        if !passes && self.context == 0 {
            return Ok(Some((pos, None)));
        }

        let resolved = match self.resolve(&address, &entry, component.as_ref(), passes)? {
            Some(resolved) => resolved,
            None => return Ok(Some((pos, None))),
        };
        Ok(Some((pos, Some(resolved))))
    }

    fn resolve(
        &self,
        address: &EntryAddress,
        entry: &LogEntry,
        component: Option<&ComponentRecord>,
        passes: bool,
    ) -> CoreResult<Option<(bool, QueryResult)>> {
        let Some(format) = self.reader.format_string(entry.string_offset)? else {
            warn!(%address, offset = entry.string_offset, "entry references unknown format string");
            return Ok(None);
        };

        let interpolated = match self.interpolate {
            Interpolation::Dont => None,
            Interpolation::Pre | Interpolation::Post => {
                let args = self.range.args()?;
                match format.interpolate_versioned(&args, self.log.stream_version()) {
                    Ok(text) => Some(text),
                    Err(e) => {
                        warn!(%address, error = %e, "skipping entry with unreadable arguments");
                        return Ok(None);
                    }
                }
            }
        };
        let matched_text = match (self.interpolate, &interpolated) {
            (Interpolation::Pre, Some(text)) => text.as_str(),
            _ => format.as_str(),
        };
        let is_match = passes && self.filter.text_matches(matched_text);
        if !is_match && self.context == 0 {
            return Ok(None);
        }

        let metadata = self.range.metadata()?;
        let metadata = if metadata.is_empty() {
            None
        } else {
            match Metadata::decode_block(&mut metadata.as_slice()) {
                Ok(decoded) if !decoded.is_none() => Some(decoded.to_json()),
                Ok(_) => None,
                Err(e) => {
                    warn!(%address, error = %e, "ignoring unreadable metadata");
                    None
                }
            }
        };

        let (host, pid, app_id, name) = match component {
            Some(c) => {
                let host = match c.addr.ip() {
                    IpAddr::V4(ip) => self.reader.hostname(ip).unwrap_or_else(|| ip.to_string()),
                    IpAddr::V6(ip) => ip.to_string(),
                };
                (host, c.pid(), c.app_id, c.name().to_string())
            }
            None => (String::from("?"), 0, 0, String::from("?")),
        };

        let result = QueryResult {
            address: address.clone(),
            time: entry.time,
            host,
            username: self.log.username().to_string(),
            pid,
            app_id,
            component: name,
            severity: entry.priority,
            category: self.reader.category_name(entry.category_id).unwrap_or_default(),
            source: entry.source,
            message: interpolated.unwrap_or_else(|| format.as_str().to_string()),
            metadata,
        };
        Ok(Some((is_match, result)))
    }

    fn emit(&mut self, pos: u64, item: QueryItem) {
        if let Some(last) = self.last_emitted {
            if self.context > 0 && last.abs_diff(pos) != 1 {
                self.ready.push_back(QueryItem::Separator);
            }
        }
        self.last_emitted = Some(pos);
        self.ready.push_back(item);
    }

    fn advance(&mut self) -> CoreResult<bool> {
        let Some((pos, resolved)) = self.next_entry()? else {
            return Ok(false);
        };
        match resolved {
            Some((true, result)) => {
                while let Some((before_pos, context)) = self.before.pop_front() {
                    self.emit(before_pos, QueryItem::Context(context));
                }
                self.emit(pos, QueryItem::Match(result));
                self.after = self.context;
            }
            Some((false, result)) if self.after > 0 => {
                self.after -= 1;
                self.emit(pos, QueryItem::Context(result));
            }
            Some((false, result)) => {
                self.before.push_back((pos, result));
                if self.before.len() > self.context {
                    self.before.pop_front();
                }
            }
            None => {}
        }
        Ok(true)
    }
}

impl Iterator for Query<'_> {
    type Item = CoreResult<QueryItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(Ok(item));
            }
            match self.advance() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
