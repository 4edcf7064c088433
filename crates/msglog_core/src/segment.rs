//! User segments.
//!
//! A segment is three append-only files sharing a suffix:
//!
//! ```text
//! entries.<suffix>    fixed LogEntry records
//! args.<suffix>       argument streams, referenced by offset/length
//! metadata.<suffix>   metadata blocks, referenced by offset/length
//! ```
//!
//! Blobs are written before the entry that references them, so a reader
//! that sees an entry can always read its blobs.

use crate::entry::LogEntry;
use crate::error::{CoreError, CoreResult};
use crate::types::{EntryAddress, LogTime};
use chrono::Utc;
use msglog_storage::{FileBackend, StorageBackend};
use std::fs;
use std::path::Path;

pub(crate) const ENTRIES_PREFIX: &str = "entries.";
pub(crate) const ARGS_PREFIX: &str = "args.";
pub(crate) const METADATA_PREFIX: &str = "metadata.";

/// One segment of a user's log.
#[derive(Debug)]
pub struct Segment {
    suffix: String,
    entries: FileBackend,
    args: FileBackend,
    metadata: FileBackend,
}

impl Segment {
    /// Creates a new segment in `dir` for writing.
    ///
    /// The entries file is created last: readers discover segments by it.
    pub fn create(dir: &Path, suffix: &str) -> CoreResult<Self> {
        let args = FileBackend::open(&dir.join(format!("{ARGS_PREFIX}{suffix}")))?;
        let metadata = FileBackend::open(&dir.join(format!("{METADATA_PREFIX}{suffix}")))?;
        let entries = FileBackend::open(&dir.join(format!("{ENTRIES_PREFIX}{suffix}")))?;
        Ok(Self {
            suffix: suffix.to_string(),
            entries,
            args,
            metadata,
        })
    }

    /// Opens an existing segment without write access.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownSuffix`] unless all three files exist.
    pub fn open_read_only(dir: &Path, suffix: &str) -> CoreResult<Self> {
        let paths = [ENTRIES_PREFIX, ARGS_PREFIX, METADATA_PREFIX]
            .map(|prefix| dir.join(format!("{prefix}{suffix}")));
        if !paths.iter().all(|p| p.exists()) {
            return Err(CoreError::unknown_suffix(suffix));
        }
        let [entries, args, metadata] = paths;
        Ok(Self {
            suffix: suffix.to_string(),
            entries: FileBackend::open_read_only(&entries)?,
            args: FileBackend::open_read_only(&args)?,
            metadata: FileBackend::open_read_only(&metadata)?,
        })
    }

    /// The segment suffix.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Number of complete entries. A partially written trailing record is
    /// not counted.
    pub fn len(&self) -> CoreResult<u32> {
        let count = self.entries.size()? / LogEntry::SIZE as u64;
        u32::try_from(count)
            .map_err(|_| CoreError::segment_corruption(format!("{} has too many entries", self.suffix)))
    }

    /// Whether the segment has no complete entries.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Bytes counted against the rotation limit: entries plus arguments.
    pub fn byte_size(&self) -> CoreResult<u64> {
        Ok(self.entries.size()? + self.args.size()?)
    }

    /// Reads the entry at `index`.
    pub fn read_entry(&self, index: u32) -> CoreResult<LogEntry> {
        if index >= self.len()? {
            return Err(CoreError::address_out_of_range(EntryAddress::new(&self.suffix, index)));
        }
        let data = self
            .entries
            .read_at(u64::from(index) * LogEntry::SIZE as u64, LogEntry::SIZE)?;
        LogEntry::decode(&data)
    }

    /// Reads the argument stream of `entry`.
    pub fn read_args(&self, entry: &LogEntry) -> CoreResult<Vec<u8>> {
        if entry.args_len == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .args
            .read_at(u64::from(entry.args_offset), entry.args_len as usize)?)
    }

    /// Reads the metadata block of `entry`; empty if it has none.
    pub fn read_metadata(&self, entry: &LogEntry) -> CoreResult<Vec<u8>> {
        if entry.metadata_len == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .metadata
            .read_at(u64::from(entry.metadata_offset), entry.metadata_len as usize)?)
    }

    /// Appends an entry and its blobs, filling in the blob offsets.
    ///
    /// Returns the index of the new entry.
    pub fn append(&mut self, mut entry: LogEntry, args: &[u8], metadata: &[u8]) -> CoreResult<u32> {
        let index = self.len()?;

        entry.args_len = blob_len(args)?;
        entry.args_offset = if args.is_empty() {
            blob_offset(self.args.size()?)?
        } else {
            blob_offset(self.args.append(args)?)?
        };
        entry.metadata_len = blob_len(metadata)?;
        entry.metadata_offset = if metadata.is_empty() {
            0
        } else {
            blob_offset(self.metadata.append(metadata)?)?
        };

        self.entries.append(&entry.to_bytes())?;
        Ok(index)
    }

    /// Time of the first entry.
    pub fn start_time(&self) -> CoreResult<Option<LogTime>> {
        if self.is_empty()? {
            return Ok(None);
        }
        Ok(Some(self.read_entry(0)?.time))
    }

    /// Time of the last entry.
    pub fn end_time(&self) -> CoreResult<Option<LogTime>> {
        let len = self.len()?;
        if len == 0 {
            return Ok(None);
        }
        Ok(Some(self.read_entry(len - 1)?.time))
    }

    /// First index whose time is at or after `time` (after, when `strict`).
    ///
    /// Entry times within a segment never decrease.
    pub fn lower_bound(&self, time: LogTime, strict: bool) -> CoreResult<u32> {
        let (mut lo, mut hi) = (0u32, self.len()?);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let t = self.read_entry(mid)?.time;
            if t < time || (strict && t == time) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Pushes written data to the OS.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.args.flush()?;
        self.metadata.flush()?;
        self.entries.flush()?;
        Ok(())
    }
}

fn blob_len(blob: &[u8]) -> CoreResult<u32> {
    u32::try_from(blob.len()).map_err(|_| CoreError::segment_corruption("blob larger than 4 GiB"))
}

fn blob_offset(offset: u64) -> CoreResult<u32> {
    u32::try_from(offset).map_err(|_| CoreError::segment_corruption("blob file larger than 4 GiB"))
}

/// Suffixes of the segments in `dir`, in creation order.
pub fn list_suffixes(dir: &Path) -> CoreResult<Vec<String>> {
    let mut suffixes = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let name = dirent?.file_name();
        if let Some(suffix) = name.to_str().and_then(|n| n.strip_prefix(ENTRIES_PREFIX)) {
            suffixes.push(suffix.to_string());
        }
    }
    suffixes.sort();
    Ok(suffixes)
}

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const STAMP_LEN: usize = 14;

/// A fresh suffix for a segment in `dir`, sorting after every existing one.
pub(crate) fn new_suffix(dir: &Path) -> CoreResult<String> {
    let now = Utc::now().format(STAMP_FORMAT).to_string();
    let newest = list_suffixes(dir)?.pop();
    Ok(next_suffix(newest.as_deref(), &now))
}

/// The suffix is the UTC time to the second. When `newest` already has that
/// stamp or a later one (the clock stepped back), its stamp is reused with
/// the next `-NNNN` counter. `-` sorts before any digit, so lexical order
/// stays creation order.
fn next_suffix(newest: Option<&str>, now: &str) -> String {
    let Some(newest) = newest else {
        return now.to_string();
    };
    let stamp = newest.get(..STAMP_LEN).unwrap_or(newest);
    if stamp < now {
        return now.to_string();
    }
    let counter = newest
        .get(STAMP_LEN..)
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|n| n.parse::<u32>().ok())
        .unwrap_or(0);
    format!("{stamp}-{:04}", counter + 1)
}
