//! Query parameters.

use crate::error::{CoreError, CoreResult};
use crate::types::{Direction, EntryAddress, LogTime};
use crate::user_log::UserLogReader;
use msglog_protocol::{MessageSource, Priority};
use serde::{Deserialize, Serialize};

/// When regular expressions are matched, and what text is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Match against the interpolated message.
    #[default]
    Pre,
    /// Match against the raw format string, then interpolate for output.
    Post,
    /// Match against and show the raw format string.
    Dont,
}

/// Period that extends the range from the start to the first entry.
pub const PERIOD_TO_BEGINNING: &str = "to beginning";
/// Period that extends the range from the start to the newest entry.
pub const PERIOD_TO_PRESENT: &str = "to present";

/// Parameters of a query over one user's log.
///
/// Everything defaults to "no restriction".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    /// Earliest entry time.
    pub start: LogTime,
    /// Latest entry time.
    pub end: LogTime,
    /// Explicit first entry; takes precedence over `start`.
    pub start_address: Option<EntryAddress>,
    /// Explicit last entry; takes precedence over `end` and `period`.
    pub end_address: Option<EntryAddress>,
    /// `"to beginning"`, `"to present"`, `"+N"`, `"-N"` or `"N"` seconds
    /// around `start`; takes precedence over `end`.
    pub period: Option<String>,
    /// Requested iteration direction.
    pub direction: Direction,
    /// Only entries from this host name or dotted address.
    pub host: Option<String>,
    /// Invert the host filter.
    pub negate_host: bool,
    /// Only entries from this pid.
    pub pid: Option<u32>,
    /// Invert the pid filter.
    pub negate_pid: bool,
    /// Only entries from this app instance id.
    pub app_id: Option<u32>,
    /// Invert the app id filter.
    pub negate_app_id: bool,
    /// Bitmask of component type ids.
    pub procs: u32,
    /// Bitmask of priorities.
    pub severities: u32,
    /// Bitmask of message sources.
    pub sources: u32,
    /// Category names; empty for all.
    pub categories: Vec<String>,
    /// Only messages matching this regular expression.
    pub include: Option<String>,
    /// Drop messages matching this regular expression.
    pub exclude: Option<String>,
    /// Case-sensitive regular expressions.
    pub casesens: bool,
    /// Interpolation mode.
    pub interpolate: Interpolation,
    /// Lines of context around each match.
    pub context: usize,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            start: LogTime::BEGIN,
            end: LogTime::END,
            start_address: None,
            end_address: None,
            period: None,
            direction: Direction::Forwards,
            host: None,
            negate_host: false,
            pid: None,
            negate_pid: false,
            app_id: None,
            negate_app_id: false,
            procs: u32::MAX,
            severities: u32::MAX,
            sources: (1 << MessageSource::COUNT) - 1,
            categories: Vec::new(),
            include: None,
            exclude: None,
            casesens: true,
            interpolate: Interpolation::Pre,
            context: 0,
        }
    }
}

impl QueryParams {
    /// Parameters matching everything, oldest first.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time range.
    #[must_use]
    pub fn with_time_range(mut self, start: LogTime, end: LogTime) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Sets the first entry address.
    #[must_use]
    pub fn with_start_address(mut self, addr: EntryAddress) -> Self {
        self.start_address = Some(addr);
        self
    }

    /// Sets the last entry address.
    #[must_use]
    pub fn with_end_address(mut self, addr: EntryAddress) -> Self {
        self.end_address = Some(addr);
        self
    }

    /// Sets the period.
    #[must_use]
    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    /// Sets the direction.
    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Restricts to one host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>, negate: bool) -> Self {
        self.host = Some(host.into());
        self.negate_host = negate;
        self
    }

    /// Restricts to one pid.
    #[must_use]
    pub fn with_pid(mut self, pid: u32, negate: bool) -> Self {
        self.pid = Some(pid);
        self.negate_pid = negate;
        self
    }

    /// Restricts to one app instance id.
    #[must_use]
    pub fn with_app_id(mut self, app_id: u32, negate: bool) -> Self {
        self.app_id = Some(app_id);
        self.negate_app_id = negate;
        self
    }

    /// Sets the component type mask.
    #[must_use]
    pub fn with_procs(mut self, mask: u32) -> Self {
        self.procs = mask;
        self
    }

    /// Sets the priority mask.
    #[must_use]
    pub fn with_severities(mut self, mask: u32) -> Self {
        self.severities = mask;
        self
    }

    /// Restricts to the given priorities.
    #[must_use]
    pub fn with_priorities(self, priorities: &[Priority]) -> Self {
        let mask = priorities.iter().fold(0, |m, p| m | p.mask());
        self.with_severities(mask)
    }

    /// Sets the message source mask.
    #[must_use]
    pub fn with_sources(mut self, mask: u32) -> Self {
        self.sources = mask;
        self
    }

    /// Restricts to the named categories.
    #[must_use]
    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the include pattern.
    #[must_use]
    pub fn with_include(mut self, pattern: impl Into<String>) -> Self {
        self.include = Some(pattern.into());
        self
    }

    /// Sets the exclude pattern.
    #[must_use]
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude = Some(pattern.into());
        self
    }

    /// Sets case sensitivity of the patterns.
    #[must_use]
    pub fn with_casesens(mut self, casesens: bool) -> Self {
        self.casesens = casesens;
        self
    }

    /// Sets the interpolation mode.
    #[must_use]
    pub fn with_interpolate(mut self, mode: Interpolation) -> Self {
        self.interpolate = mode;
        self
    }

    /// Sets the lines of context around matches.
    #[must_use]
    pub fn with_context(mut self, lines: usize) -> Self {
        self.context = lines;
        self
    }

    /// Resolves addresses and the period against `log`.
    pub(crate) fn bounds(&self, log: &UserLogReader) -> CoreResult<Bounds> {
        let mut start = match &self.start_address {
            Some(addr) => address_time(log, addr)?,
            None => self.start,
        };
        let fixed_period = self
            .period
            .as_deref()
            .is_some_and(|p| p != PERIOD_TO_BEGINNING && p != PERIOD_TO_PRESENT);
        if self.start_address.is_none() && fixed_period {
            if start == LogTime::BEGIN {
                start = log.first_entry()?.map_or(start, |e| e.time);
            } else if start == LogTime::END {
                start = log.last_entry()?.map_or(start, |e| e.time);
            }
        }

        let end = if let Some(addr) = &self.end_address {
            address_time(log, addr)?
        } else if let Some(period) = self.period.as_deref() {
            match period {
                PERIOD_TO_BEGINNING => LogTime::BEGIN,
                PERIOD_TO_PRESENT => LogTime::END,
                relative => {
                    let secs: f64 = relative.trim().parse().map_err(|_| {
                        CoreError::invalid_query(format!("bad period {relative:?}"))
                    })?;
                    let end = start.offset_secs(secs);
                    if !relative.trim_start().starts_with(['+', '-']) {
                        start = start.offset_secs(-secs);
                    }
                    end
                }
            }
        } else {
            self.end
        };

        Ok(Bounds {
            start,
            end,
            start_address: self.start_address.clone(),
            end_address: self.end_address.clone(),
        })
    }
}

/// Time of the entry at `addr`. The address one past a segment's last
/// entry takes that last entry's time.
fn address_time(log: &UserLogReader, addr: &EntryAddress) -> CoreResult<LogTime> {
    let segment = log.segment(&addr.suffix)?;
    let len = segment.len()?;
    let index = if addr.index == len { len.saturating_sub(1) } else { addr.index };
    Ok(segment.read_entry(index)?.time)
}

/// A query's resolved endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Bounds {
    pub start: LogTime,
    pub end: LogTime,
    pub start_address: Option<EntryAddress>,
    pub end_address: Option<EntryAddress>,
}

impl Bounds {
    /// Whether the end lies before the start.
    pub fn is_inverted(&self) -> bool {
        match (&self.start_address, &self.end_address) {
            (Some(start), Some(end)) => end < start,
            _ => self.end < self.start,
        }
    }

    /// Swaps start and end.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.start, &mut self.end);
        std::mem::swap(&mut self.start_address, &mut self.end_address);
    }
}
