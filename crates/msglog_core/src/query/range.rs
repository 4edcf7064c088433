//! Positioned iteration over a slice of one user's log.
//!
//! Entries are numbered globally across the segment snapshot, so a range
//! is a half-open interval `[begin, end)` of positions. Closed segments
//! never change and new entries only append, so positions of existing
//! entries are stable across [`QueryRange::resume`].

use super::params::{Bounds, QueryParams};
use crate::entry::LogEntry;
use crate::error::{CoreError, CoreResult};
use crate::segment::Segment;
use crate::types::{Direction, EntryAddress, LogTime};
use crate::user_log::UserLogReader;
use std::sync::Arc;

/// Iterates entries of one user's log between two resolved sentinels.
#[derive(Debug)]
pub struct QueryRange<'a> {
    log: &'a UserLogReader,
    segments: Vec<Arc<Segment>>,
    /// `bases[i]` is the position of segment `i`'s first entry; the last
    /// element is the total.
    bases: Vec<u64>,
    bounds: Bounds,
    direction: Direction,
    swapped: bool,
    begin: u64,
    end: u64,
    /// Forwards: the next position to read. Backwards: one past it.
    cursor: u64,
    /// Position, segment and value of the entry last returned.
    last: Option<(u64, usize, LogEntry)>,
}

impl<'a> QueryRange<'a> {
    /// Resolves the range described by `params` over `log`.
    ///
    /// If the end lies before the start, both ends and the direction are
    /// swapped, so iteration still starts at the requested start.
    pub fn new(log: &'a UserLogReader, params: &QueryParams) -> CoreResult<Self> {
        let mut bounds = params.bounds(log)?;
        let mut direction = params.direction;
        let swapped = bounds.is_inverted();
        if swapped {
            bounds.swap();
            direction = direction.reversed();
        }

        let mut range = Self {
            log,
            segments: Vec::new(),
            bases: vec![0],
            bounds,
            direction,
            swapped,
            begin: 0,
            end: 0,
            cursor: 0,
            last: None,
        };
        range.snapshot()?;
        range.begin = match range.bounds.start_address.clone() {
            Some(addr) => range.position(&addr)?,
            None => range.lower_bound(range.bounds.start, false)?,
        };
        range.end = range.resolve_end()?.max(range.begin);
        range.cursor = match direction {
            Direction::Forwards => range.begin,
            Direction::Backwards => range.end,
        };
        Ok(range)
    }

    fn snapshot(&mut self) -> CoreResult<()> {
        self.segments = self.log.segments();
        let mut bases = Vec::with_capacity(self.segments.len() + 1);
        let mut total = 0u64;
        for segment in &self.segments {
            bases.push(total);
            total += u64::from(segment.len()?);
        }
        bases.push(total);
        self.bases = bases;
        Ok(())
    }

    /// One past the last position in the range. An end address never
    /// reaches past its own segment.
    fn resolve_end(&self) -> CoreResult<u64> {
        match &self.bounds.end_address {
            Some(addr) => {
                let (seg, pos) = self.segment_position(addr)?;
                Ok((pos + 1).min(self.bases[seg + 1]))
            }
            None => self.lower_bound(self.bounds.end, true),
        }
    }

    fn total(&self) -> u64 {
        self.bases.last().copied().unwrap_or(0)
    }

    fn segment_len(&self, seg: usize) -> u32 {
        (self.bases[seg + 1] - self.bases[seg]) as u32
    }

    /// First position whose time is at or after `time` (after, if
    /// `strict`), by scanning segment time bounds.
    fn lower_bound(&self, time: LogTime, strict: bool) -> CoreResult<u64> {
        for (i, segment) in self.segments.iter().enumerate() {
            let len = self.segment_len(i);
            if len == 0 {
                continue;
            }
            let last = segment.read_entry(len - 1)?.time;
            if last < time || (strict && last == time) {
                continue;
            }
            let index = segment.lower_bound(time, strict)?.min(len);
            return Ok(self.bases[i] + u64::from(index));
        }
        Ok(self.total())
    }

    /// Position of `addr`. The address one past a segment's last entry is
    /// accepted.
    fn position(&self, addr: &EntryAddress) -> CoreResult<u64> {
        self.segment_position(addr).map(|(_, pos)| pos)
    }

    fn segment_position(&self, addr: &EntryAddress) -> CoreResult<(usize, u64)> {
        let seg = self
            .segments
            .binary_search_by(|s| s.suffix().cmp(addr.suffix.as_str()))
            .map_err(|_| CoreError::unknown_suffix(&addr.suffix))?;
        if addr.index > self.segment_len(seg) {
            return Err(CoreError::address_out_of_range(addr));
        }
        Ok((seg, self.bases[seg] + u64::from(addr.index)))
    }

    fn locate(&self, pos: u64) -> (usize, u32) {
        let seg = self.bases[..self.segments.len()]
            .partition_point(|base| *base <= pos)
            .saturating_sub(1);
        (seg, (pos - self.bases[seg]) as u32)
    }

    fn address_at(&self, pos: u64) -> EntryAddress {
        let (seg, index) = self.locate(pos);
        EntryAddress::new(self.segments[seg].suffix(), index)
    }

    /// Effective iteration direction, after any swap.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether the requested ends were swapped.
    #[must_use]
    pub fn is_swapped(&self) -> bool {
        self.swapped
    }

    /// Position of the entry last returned.
    pub(crate) fn last_position(&self) -> Option<u64> {
        self.last.as_ref().map(|(pos, _, _)| *pos)
    }

    /// Reads the next entry in the iteration direction, or `None` once the
    /// range is exhausted.
    pub fn get_next_entry(&mut self) -> CoreResult<Option<(EntryAddress, LogEntry)>> {
        let pos = match self.direction {
            Direction::Forwards if self.cursor < self.end => {
                self.cursor += 1;
                self.cursor - 1
            }
            Direction::Backwards if self.cursor > self.begin => {
                self.cursor -= 1;
                self.cursor
            }
            _ => return Ok(None),
        };
        let (seg, index) = self.locate(pos);
        let entry = self.segments[seg].read_entry(index)?;
        self.last = Some((pos, seg, entry));
        Ok(Some((EntryAddress::new(self.segments[seg].suffix(), index), entry)))
    }

    /// Argument stream of the entry last returned.
    pub fn args(&self) -> CoreResult<Vec<u8>> {
        match &self.last {
            Some((_, seg, entry)) => self.segments[*seg].read_args(entry),
            None => Ok(Vec::new()),
        }
    }

    /// Metadata block of the entry last returned.
    pub fn metadata(&self) -> CoreResult<Vec<u8>> {
        match &self.last {
            Some((_, seg, entry)) => self.segments[*seg].read_metadata(entry),
            None => Ok(Vec::new()),
        }
    }

    /// Positions the range so that the next entry returned is `addr`, or
    /// the one after it (in the iteration direction) if `post_increment`.
    ///
    /// The address just past the last entry of the range is accepted and
    /// leaves the range exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AddressOutOfRange`] if `addr` lies outside the
    /// range, or [`CoreError::UnknownSuffix`].
    pub fn seek(&mut self, addr: &EntryAddress, post_increment: bool) -> CoreResult<()> {
        let pos = self.position(addr)?;
        if pos < self.begin || pos > self.end {
            return Err(CoreError::address_out_of_range(addr));
        }
        let skip = u64::from(post_increment);
        self.cursor = match self.direction {
            Direction::Forwards => (pos + skip).min(self.end),
            Direction::Backwards if pos == self.end => self.begin,
            Direction::Backwards => pos + 1 - skip,
        };
        Ok(())
    }

    /// Moves one entry in `direction` without reading it. Returns `false`
    /// at the edge of the range.
    pub fn step(&mut self, direction: Direction) -> bool {
        match direction {
            Direction::Forwards if self.cursor < self.end => self.cursor += 1,
            Direction::Backwards if self.cursor > self.begin => self.cursor -= 1,
            _ => return false,
        }
        true
    }

    /// Address of the entry the next call to
    /// [`QueryRange::get_next_entry`] returns.
    #[must_use]
    pub fn tell(&self) -> Option<EntryAddress> {
        match self.direction {
            Direction::Forwards if self.cursor < self.end => Some(self.address_at(self.cursor)),
            Direction::Backwards if self.cursor > self.begin => Some(self.address_at(self.cursor - 1)),
            _ => None,
        }
    }

    /// Entries consumed so far and the size of the range.
    #[must_use]
    pub fn get_progress(&self) -> (u64, u64) {
        let done = match self.direction {
            Direction::Forwards => self.cursor - self.begin,
            Direction::Backwards => self.end - self.cursor,
        };
        (done, self.end - self.begin)
    }

    /// Number of entries from `a` up to `b`, in either order.
    pub fn entries_between(&self, a: &EntryAddress, b: &EntryAddress) -> CoreResult<u64> {
        let (a, b) = (self.position(a)?, self.position(b)?);
        Ok(a.abs_diff(b))
    }

    /// Picks up entries and segments written since the range was resolved
    /// and re-resolves the end.
    pub fn resume(&mut self) -> CoreResult<()> {
        self.log.refresh()?;
        self.snapshot()?;
        let end = self.resolve_end()?.max(self.begin);
        match (self.direction, self.last_position()) {
            (Direction::Forwards, Some(last)) if self.cursor >= self.end => {
                // exhausted: continue just past the last consumed entry
                self.cursor = last + 1;
            }
            (Direction::Backwards, None) if self.cursor == self.end => self.cursor = end,
            _ => {}
        }
        self.end = end;
        Ok(())
    }
}
