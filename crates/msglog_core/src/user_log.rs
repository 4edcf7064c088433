//! One user's log: segments plus the components directory.

use crate::config::StorageConfig;
use crate::dir::{username_for_uid, COMPONENTS_FILE, UID_FILE};
use crate::entry::LogEntry;
use crate::error::{CoreError, CoreResult};
use crate::registry::{ComponentRecord, Registry};
use crate::segment::{list_suffixes, new_suffix, Segment};
use crate::types::EntryAddress;
use msglog_format::StreamVersion;
use msglog_protocol::ComponentRegistration;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct ComponentDirectory {
    registry: Registry<ComponentRecord>,
    by_id: BTreeMap<u32, ComponentRecord>,
}

impl ComponentDirectory {
    fn open(dir: &Path, writable: bool) -> CoreResult<Self> {
        let path = dir.join(COMPONENTS_FILE);
        let registry = if writable {
            Registry::open(&path)?
        } else {
            Registry::open_read_only(&path)?
        };
        let mut components = Self {
            registry,
            by_id: BTreeMap::new(),
        };
        components.index_from(0);
        Ok(components)
    }

    fn index_from(&mut self, first: usize) {
        for (_, record) in &self.registry.records()[first..] {
            self.by_id.insert(record.id, record.clone());
        }
    }

    fn refresh(&mut self) -> CoreResult<()> {
        let first = self.registry.refresh()?;
        self.index_from(first);
        Ok(())
    }

    fn write(&mut self, record: ComponentRecord) -> CoreResult<()> {
        self.registry.append(record.clone())?;
        self.by_id.insert(record.id, record);
        Ok(())
    }

    fn next_id(&self) -> u32 {
        self.by_id.keys().next_back().map_or(1, |id| id + 1)
    }

    fn find(&self, registration: &ComponentRegistration) -> Option<&ComponentRecord> {
        self.by_id.values().rev().find(|r| &r.registration == registration)
    }
}

/// The writer side of a user's log, owned by the collector.
#[derive(Debug)]
pub struct UserLog {
    uid: u16,
    username: String,
    dir: PathBuf,
    segment_size: u64,
    flush_each_entry: bool,
    active: Option<Segment>,
    components: ComponentDirectory,
}

impl UserLog {
    /// Opens (creating if needed) the log of `uid` under `root`.
    pub fn open(root: &Path, uid: u16, config: &StorageConfig) -> CoreResult<Self> {
        let username = username_for_uid(uid);
        let dir = root.join(&username);
        fs::create_dir_all(&dir)?;

        let uid_path = dir.join(UID_FILE);
        match fs::read_to_string(&uid_path) {
            Ok(text) if text.trim().parse::<u16>().ok() != Some(uid) => {
                warn!(%username, uid, found = text.trim(), "uid file disagrees with user lookup");
            }
            Ok(_) => {}
            Err(_) => fs::write(&uid_path, format!("{uid}\n"))?,
        }

        Ok(Self {
            uid,
            username,
            components: ComponentDirectory::open(&dir, true)?,
            dir,
            segment_size: config.segment_size,
            flush_each_entry: config.flush_each_entry,
            active: None,
        })
    }

    /// The user id.
    #[must_use]
    pub fn uid(&self) -> u16 {
        self.uid
    }

    /// The user name, which is also the directory name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Suffix of the segment open for writing.
    #[must_use]
    pub fn active_suffix(&self) -> Option<&str> {
        self.active.as_ref().map(Segment::suffix)
    }

    fn needs_rotation(&self) -> CoreResult<bool> {
        match &self.active {
            None => Ok(true),
            Some(segment) => Ok(segment.byte_size()? > self.segment_size),
        }
    }

    /// Closes the active segment and opens a new one.
    pub fn rotate(&mut self) -> CoreResult<()> {
        self.close_active()?;
        let suffix = new_suffix(&self.dir)?;
        let segment = Segment::create(&self.dir, &suffix)?;
        info!(user = %self.username, %suffix, "opened segment");
        self.active = Some(segment);
        Ok(())
    }

    /// Closes the active segment, if any. Its files stay on disk.
    pub fn close_active(&mut self) -> CoreResult<()> {
        if let Some(mut segment) = self.active.take() {
            segment.flush()?;
        }
        Ok(())
    }

    /// Appends an entry, rotating first if needed.
    ///
    /// Returns the entry's address and whether a new segment was opened.
    pub fn append(
        &mut self,
        entry: LogEntry,
        args: &[u8],
        metadata: &[u8],
    ) -> CoreResult<(EntryAddress, bool)> {
        let rotated = self.needs_rotation()?;
        if rotated {
            self.rotate()?;
        }
        let Some(segment) = self.active.as_mut() else {
            return Err(CoreError::segment_corruption("no active segment after rotation"));
        };
        let index = segment.append(entry, args, metadata)?;
        if self.flush_each_entry {
            segment.flush()?;
        }
        Ok((EntryAddress::new(segment.suffix(), index), rotated))
    }

    /// A persisted component with the same registration, if any.
    #[must_use]
    pub fn find_component(&self, registration: &ComponentRegistration) -> Option<&ComponentRecord> {
        self.components.find(registration)
    }

    /// The latest record for component `id`.
    #[must_use]
    pub fn component(&self, id: u32) -> Option<&ComponentRecord> {
        self.components.by_id.get(&id)
    }

    /// Id the next new component will get.
    #[must_use]
    pub fn next_component_id(&self) -> u32 {
        self.components.next_id()
    }

    /// Persists a component record.
    pub fn write_component(&mut self, record: ComponentRecord) -> CoreResult<()> {
        self.components.write(record)
    }

    /// Pushes buffered segment data to the OS.
    pub fn flush(&mut self) -> CoreResult<()> {
        match self.active.as_mut() {
            Some(segment) => segment.flush(),
            None => Ok(()),
        }
    }
}

/// The reader side of a user's log.
///
/// Segment lists and components are refreshed in place, so queries that
/// borrow the reader see data written after they started.
#[derive(Debug)]
pub struct UserLogReader {
    uid: u16,
    username: String,
    dir: PathBuf,
    stream_version: StreamVersion,
    segments: RwLock<Vec<Arc<Segment>>>,
    components: RwLock<ComponentDirectory>,
}

impl UserLogReader {
    /// Opens the log in `root/<username>`.
    pub fn open(root: &Path, username: &str, stream_version: StreamVersion) -> CoreResult<Self> {
        let dir = root.join(username);
        let uid = read_uid(&dir)?;
        let reader = Self {
            uid,
            username: username.to_string(),
            components: RwLock::new(ComponentDirectory::open(&dir, false)?),
            dir,
            stream_version,
            segments: RwLock::new(Vec::new()),
        };
        reader.refresh()?;
        Ok(reader)
    }

    /// The user id.
    #[must_use]
    pub fn uid(&self) -> u16 {
        self.uid
    }

    /// The user name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Layout of the argument streams in this log.
    #[must_use]
    pub fn stream_version(&self) -> StreamVersion {
        self.stream_version
    }

    /// Snapshot of the segment list, oldest first.
    #[must_use]
    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.segments.read().clone()
    }

    /// The segment with `suffix`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownSuffix`] if there is none.
    pub fn segment(&self, suffix: &str) -> CoreResult<Arc<Segment>> {
        let segments = self.segments.read();
        segments
            .binary_search_by(|s| s.suffix().cmp(suffix))
            .map(|i| Arc::clone(&segments[i]))
            .map_err(|_| CoreError::unknown_suffix(suffix))
    }

    /// Reads the entry at `addr`.
    pub fn entry(&self, addr: &EntryAddress) -> CoreResult<LogEntry> {
        self.segment(&addr.suffix)?.read_entry(addr.index)
    }

    /// The oldest entry.
    pub fn first_entry(&self) -> CoreResult<Option<LogEntry>> {
        for segment in self.segments.read().iter() {
            if !segment.is_empty()? {
                return Ok(Some(segment.read_entry(0)?));
            }
        }
        Ok(None)
    }

    /// The newest entry.
    pub fn last_entry(&self) -> CoreResult<Option<LogEntry>> {
        for segment in self.segments.read().iter().rev() {
            let len = segment.len()?;
            if len > 0 {
                return Ok(Some(segment.read_entry(len - 1)?));
            }
        }
        Ok(None)
    }

    /// The latest record for component `id`.
    #[must_use]
    pub fn component(&self, id: u32) -> Option<ComponentRecord> {
        self.components.read().by_id.get(&id).cloned()
    }

    /// Every component, by id.
    #[must_use]
    pub fn components(&self) -> Vec<ComponentRecord> {
        self.components.read().by_id.values().cloned().collect()
    }

    /// Picks up new segments and components.
    ///
    /// Segments are matched by suffix, so one that sorts among the known
    /// segments is inserted in place rather than assumed to be last.
    pub fn refresh(&self) -> CoreResult<()> {
        let suffixes = list_suffixes(&self.dir)?;
        {
            let mut segments = self.segments.write();
            for suffix in &suffixes {
                if let Err(at) = segments.binary_search_by(|s| s.suffix().cmp(suffix.as_str())) {
                    match Segment::open_read_only(&self.dir, suffix) {
                        Ok(segment) => segments.insert(at, Arc::new(segment)),
                        Err(CoreError::UnknownSuffix { .. }) => {
                            debug!(user = %self.username, %suffix, "segment still being created");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        self.components.write().refresh()
    }
}

fn read_uid(dir: &Path) -> CoreResult<u16> {
    let text = fs::read_to_string(dir.join(UID_FILE))
        .map_err(|e| CoreError::invalid_format(format!("{}: {e}", dir.join(UID_FILE).display())))?;
    text.trim()
        .parse()
        .map_err(|_| CoreError::invalid_format(format!("bad uid file in {}", dir.display())))
}

/// User directories under `root`: name to uid.
pub(crate) fn list_users(root: &Path) -> CoreResult<BTreeMap<String, u16>> {
    let mut users = BTreeMap::new();
    for dirent in fs::read_dir(root)? {
        let dirent = dirent?;
        if !dirent.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = dirent.file_name().to_str().map(str::to_string) else {
            continue;
        };
        match read_uid(&dirent.path()) {
            Ok(uid) => {
                users.insert(name, uid);
            }
            Err(e) => warn!(user = %name, error = %e, "skipping directory without uid"),
        }
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogTime;
    use msglog_protocol::{MessageSource, Priority};
    use tempfile::tempdir;

    fn entry(secs: i64) -> LogEntry {
        LogEntry {
            time: LogTime::new(secs, 0),
            component_id: 1,
            category_id: 0,
            source: MessageSource::Cpp,
            priority: Priority::Info,
            string_offset: 0,
            args_offset: 0,
            args_len: 0,
            metadata_offset: 0,
            metadata_len: 0,
        }
    }

    #[test]
    fn rotates_when_segment_is_full() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path()).with_segment_size(100);
        let mut log = UserLog::open(dir.path(), 61_001, &config).unwrap();

        let (first, rotated) = log.append(entry(1), b"0123456789", b"").unwrap();
        assert!(rotated);
        assert_eq!(first.index, 0);
        let (second, rotated) = log.append(entry(2), b"0123456789", b"").unwrap();
        assert!(!rotated);
        assert_eq!(second.index, 1);
        // 2 * (38 + 10) = 96, still within 100
        let (third, rotated) = log.append(entry(3), b"0123456789", b"").unwrap();
        assert!(!rotated);
        let (fourth, rotated) = log.append(entry(4), b"", b"").unwrap();
        assert!(rotated);
        assert_eq!(fourth.index, 0);
        assert!(fourth.suffix > third.suffix);

        let reader = UserLogReader::open(dir.path(), log.username(), StreamVersion::Wide).unwrap();
        assert_eq!(reader.uid(), 61_001);
        assert_eq!(reader.segments().len(), 2);
        assert_eq!(reader.last_entry().unwrap().unwrap().time, LogTime::new(4, 0));
        assert_eq!(reader.entry(&second).unwrap().time, LogTime::new(2, 0));
    }

    #[test]
    fn reader_refresh_finds_new_segments() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let mut log = UserLog::open(dir.path(), 61_002, &config).unwrap();
        log.append(entry(1), b"", b"").unwrap();

        let reader = UserLogReader::open(dir.path(), log.username(), StreamVersion::Wide).unwrap();
        log.rotate().unwrap();
        log.append(entry(2), b"", b"").unwrap();
        assert_eq!(reader.segments().len(), 1);
        reader.refresh().unwrap();
        assert_eq!(reader.segments().len(), 2);
        assert!(matches!(reader.segment("missing"), Err(CoreError::UnknownSuffix { .. })));
    }

    #[test]
    fn refresh_places_out_of_order_segments_by_suffix() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let log = UserLog::open(dir.path(), 61_004, &config).unwrap();
        let user_dir = dir.path().join(log.username());

        let mut later = Segment::create(&user_dir, "20241103014500").unwrap();
        later.append(entry(2), b"", b"").unwrap();
        later.flush().unwrap();

        let reader = UserLogReader::open(dir.path(), log.username(), StreamVersion::Wide).unwrap();
        assert_eq!(reader.segments().len(), 1);

        let mut earlier = Segment::create(&user_dir, "20241103013000").unwrap();
        earlier.append(entry(1), b"", b"").unwrap();
        earlier.flush().unwrap();
        reader.refresh().unwrap();
        reader.refresh().unwrap();

        let suffixes: Vec<String> = reader.segments().iter().map(|s| s.suffix().to_string()).collect();
        assert_eq!(suffixes, ["20241103013000", "20241103014500"]);
        assert_eq!(reader.first_entry().unwrap().unwrap().time, LogTime::new(1, 0));
        assert_eq!(reader.segment("20241103014500").unwrap().len().unwrap(), 1);
    }

    #[test]
    fn refresh_waits_for_segment_files() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let mut log = UserLog::open(dir.path(), 61_005, &config).unwrap();
        log.append(entry(1), b"", b"").unwrap();
        let user_dir = dir.path().join(log.username());

        let reader = UserLogReader::open(dir.path(), log.username(), StreamVersion::Wide).unwrap();
        fs::write(user_dir.join("entries.99991231235959"), b"").unwrap();
        reader.refresh().unwrap();
        assert_eq!(reader.segments().len(), 1);

        fs::write(user_dir.join("args.99991231235959"), b"").unwrap();
        fs::write(user_dir.join("metadata.99991231235959"), b"").unwrap();
        reader.refresh().unwrap();
        assert_eq!(reader.segments().len(), 2);
    }

    #[test]
    fn users_are_listed_by_uid_file() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let log = UserLog::open(dir.path(), 61_003, &config).unwrap();
        fs::create_dir(dir.path().join("stray")).unwrap();

        let users = list_users(dir.path()).unwrap();
        assert_eq!(users.get(log.username()), Some(&61_003));
        assert!(!users.contains_key("stray"));
    }
}
