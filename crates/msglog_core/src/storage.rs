//! The collector's view of a log directory.

use crate::config::StorageConfig;
use crate::dir::{self, check_version, PidLock};
use crate::entry::LogEntry;
use crate::error::{CoreError, CoreResult};
use crate::registry::{
    Categories, ComponentNames, ComponentRecord, FormatStrings, HostResolver, Hostnames,
    SystemResolver,
};
use crate::types::{EntryAddress, LogTime};
use crate::user_log::UserLog;
use msglog_protocol::{ComponentRegistration, LogMessage};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A producer connection as the collector knows it.
#[derive(Debug, Clone)]
struct ActiveComponent {
    registration: ComponentRegistration,
    app_id: u32,
    /// Assigned when the first entry is written.
    id: Option<u32>,
}

/// Single writer of a log directory.
///
/// Holds the directory's `pid_lock` for its whole life. Dropping it
/// flushes every user log and removes `active_files`.
pub struct LogStorage {
    root: PathBuf,
    config: StorageConfig,
    strings: FormatStrings,
    hostnames: Hostnames,
    component_names: ComponentNames,
    categories: Categories,
    users: BTreeMap<u16, UserLog>,
    components: HashMap<SocketAddr, ActiveComponent>,
    resolver: Box<dyn HostResolver>,
    _lock: PidLock,
}

impl std::fmt::Debug for LogStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStorage")
            .field("root", &self.root)
            .field("users", &self.users.len())
            .field("components", &self.components.len())
            .finish_non_exhaustive()
    }
}

impl LogStorage {
    /// Opens `config.logdir` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Locked`] if another process owns the
    /// directory, or [`CoreError::UnsupportedVersion`] for newer data.
    pub fn open(config: StorageConfig) -> CoreResult<Self> {
        let root = config.logdir.clone();
        if !root.is_dir() {
            if !config.create_if_missing {
                return Err(CoreError::invalid_format(format!(
                    "{} does not exist",
                    root.display()
                )));
            }
            fs::create_dir_all(&root)?;
        }

        let lock = PidLock::acquire(&root)?;
        check_version(&root, config.create_if_missing)?;

        let storage = Self {
            strings: FormatStrings::open(&root)?,
            hostnames: Hostnames::open(&root)?,
            component_names: ComponentNames::open(&root)?,
            categories: Categories::open(&root)?,
            users: BTreeMap::new(),
            components: HashMap::new(),
            resolver: Box::new(SystemResolver),
            _lock: lock,
            root,
            config,
        };
        info!(logdir = %storage.root.display(), "opened log storage");
        Ok(storage)
    }

    /// Replaces the hostname resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl HostResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// The log directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The format string registry.
    #[must_use]
    pub fn format_strings(&self) -> &FormatStrings {
        &self.strings
    }

    /// Stores one message from the producer at `addr`, timestamped now.
    pub fn write_log(
        &mut self,
        addr: SocketAddr,
        registration: &ComponentRegistration,
        message: &LogMessage,
    ) -> CoreResult<EntryAddress> {
        self.write_log_at(LogTime::now(), addr, registration, message)
    }

    /// Stores one message with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Format`] for a malformed format string, in
    /// which case nothing is written.
    pub fn write_log_at(
        &mut self,
        time: LogTime,
        addr: SocketAddr,
        registration: &ComponentRegistration,
        message: &LogMessage,
    ) -> CoreResult<EntryAddress> {
        let string_offset = self.strings.offset_for(&message.format)?;
        let category_id = self.categories.id_for(&message.category)?;

        let mut component = self.take_component(addr, registration);
        let user = open_user(&mut self.users, &self.root, &self.config, registration.uid)?;

        let mut first_record = None;
        if component.id.is_none() {
            let reused = user.find_component(registration).cloned();
            let id = reused.as_ref().map_or_else(|| user.next_component_id(), |r| r.id);
            if component.app_id == 0 {
                component.app_id = reused.as_ref().map_or(0, |r| r.app_id);
            }
            component.id = Some(id);
            first_record = Some((id, reused));
        }
        let component_id = component.id.unwrap_or_default();

        let entry = LogEntry {
            time,
            component_id,
            category_id,
            source: message.source,
            priority: message.priority,
            string_offset,
            args_offset: 0,
            args_len: 0,
            metadata_offset: 0,
            metadata_len: 0,
        };
        let metadata = message.metadata.to_block();
        let result = user.append(entry, &message.args, &metadata);
        let (address, rotated) = match result {
            Ok(ok) => ok,
            Err(e) => {
                if first_record.is_some() {
                    component.id = None;
                }
                self.components.insert(addr, component);
                return Err(e);
            }
        };

        if let Some((id, reused)) = first_record {
            let type_id = self.component_names.id_for(&registration.component_name)?;
            let record = ComponentRecord {
                id,
                addr,
                registration: registration.clone(),
                type_id,
                app_id: component.app_id,
                first_entry: reused.map_or_else(|| address.clone(), |r| r.first_entry),
            };
            user.write_component(record)?;
            if let IpAddr::V4(ip) = addr.ip() {
                self.hostnames.resolve(ip, self.resolver.as_ref())?;
            }
            debug!(%addr, id, name = %registration.component_name, "component wrote first entry");
        }
        self.components.insert(addr, component);

        if rotated {
            self.update_active_files()?;
        }
        Ok(address)
    }

    /// Finds the component for `addr`, replacing it if the registration
    /// changed and remapping it if the same process reconnected from a
    /// new address.
    fn take_component(&mut self, addr: SocketAddr, registration: &ComponentRegistration) -> ActiveComponent {
        if let Some(existing) = self.components.remove(&addr) {
            if &existing.registration == registration {
                return existing;
            }
            debug!(%addr, "registration changed, replacing component");
        }

        let moved = self
            .components
            .iter()
            .find(|(_, c)| &c.registration == registration)
            .map(|(a, _)| *a);
        if let Some(old) = moved {
            if let Some(component) = self.components.remove(&old) {
                debug!(from = %old, to = %addr, "component reconnected");
                return ActiveComponent { id: None, ..component };
            }
        }

        ActiveComponent {
            registration: registration.clone(),
            app_id: 0,
            id: None,
        }
    }

    /// Records the app instance id of the component at `addr`.
    ///
    /// Returns `false` if nothing is registered at `addr`.
    pub fn set_app_id(&mut self, addr: SocketAddr, app_id: u32) -> CoreResult<bool> {
        let Some(component) = self.components.get_mut(&addr) else {
            warn!(%addr, app_id, "app id for unknown component");
            return Ok(false);
        };
        component.app_id = app_id;
        let (uid, id) = (component.registration.uid, component.id);

        if let Some(id) = id {
            let user = open_user(&mut self.users, &self.root, &self.config, uid)?;
            if let Some(mut record) = user.component(id).cloned() {
                record.app_id = app_id;
                record.addr = addr;
                user.write_component(record)?;
            }
        }
        Ok(true)
    }

    /// Registers a component without writing anything, as a producer's
    /// register frame does.
    pub fn register_component(&mut self, addr: SocketAddr, registration: &ComponentRegistration) {
        let component = self.take_component(addr, registration);
        self.components.insert(addr, component);
    }

    /// Forgets the component at `addr`. Returns whether one was known.
    pub fn stop_logging_from_component(&mut self, addr: SocketAddr) -> bool {
        let known = self.components.remove(&addr).is_some();
        if known {
            debug!(%addr, "stopped logging from component");
        }
        known
    }

    /// Number of producer addresses currently mapped.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Closes every user's active segment; the next write to each user
    /// opens a new one.
    pub fn roll(&mut self) -> CoreResult<()> {
        for user in self.users.values_mut() {
            user.close_active()?;
        }
        info!("rolled all user logs");
        self.update_active_files()
    }

    fn update_active_files(&self) -> CoreResult<()> {
        let active: Vec<(String, String)> = self
            .users
            .values()
            .filter_map(|u| u.active_suffix().map(|s| (u.username().to_string(), s.to_string())))
            .collect();
        dir::write_active_files(&self.root, &active)
    }

    /// Pushes buffered data to the OS.
    pub fn flush(&mut self) -> CoreResult<()> {
        for user in self.users.values_mut() {
            user.flush()?;
        }
        Ok(())
    }

    /// Hostname registered for `ip`.
    #[must_use]
    pub fn hostname(&self, ip: Ipv4Addr) -> Option<&str> {
        self.hostnames.name(ip)
    }
}

fn open_user<'a>(
    users: &'a mut BTreeMap<u16, UserLog>,
    root: &Path,
    config: &StorageConfig,
    uid: u16,
) -> CoreResult<&'a mut UserLog> {
    if !users.contains_key(&uid) {
        users.insert(uid, UserLog::open(root, uid, config)?);
    }
    users
        .get_mut(&uid)
        .ok_or(CoreError::UnknownUser { uid })
}

impl Drop for LogStorage {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to flush log storage");
        }
        dir::delete_active_files(&self.root);
        info!(logdir = %self.root.display(), "closed log storage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::read_active_files;
    use crate::user_log::UserLogReader;
    use msglog_format::{Arg, StreamVersion};
    use msglog_protocol::Priority;
    use tempfile::tempdir;

    struct NoResolver;

    impl HostResolver for NoResolver {
        fn resolve(&self, _addr: Ipv4Addr) -> Option<String> {
            None
        }
    }

    const UID: u16 = 61_010;

    fn open(root: &Path, segment_size: u64) -> LogStorage {
        LogStorage::open(StorageConfig::new(root).with_segment_size(segment_size))
            .unwrap()
            .with_resolver(NoResolver)
    }

    fn message(text: &str) -> LogMessage {
        let fmt = msglog_format::FormatString::parse("%s").unwrap();
        let args = fmt.stream_args(&[Arg::from(text)]).unwrap();
        LogMessage::new(Priority::Info, "%s", args)
    }

    fn registration(pid: u32) -> ComponentRegistration {
        ComponentRegistration::new("cellapp", UID, pid)
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn reader(storage: &LogStorage) -> UserLogReader {
        let username = dir::username_for_uid(UID);
        UserLogReader::open(storage.root(), &username, StreamVersion::Wide).unwrap()
    }

    #[test]
    fn second_writer_is_locked_out() {
        let dir = tempdir().unwrap();
        let _storage = open(dir.path(), 1024);
        assert!(matches!(
            LogStorage::open(StorageConfig::new(dir.path())),
            Err(CoreError::Locked { stale: false, .. })
        ));
    }

    #[test]
    fn component_record_written_with_first_entry() {
        let dir = tempdir().unwrap();
        let mut storage = open(dir.path(), 1024);
        storage.register_component(addr(1), &registration(10));
        assert!(!dir.path().join(dir::username_for_uid(UID)).exists());

        let first = storage.write_log(addr(1), &registration(10), &message("a")).unwrap();
        storage.write_log(addr(1), &registration(10), &message("b")).unwrap();

        let log = reader(&storage);
        let components = log.components();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].first_entry, first);
        assert_eq!(components[0].addr, addr(1));
        assert_eq!(storage.hostname(Ipv4Addr::LOCALHOST), Some("127.0.0.1"));
    }

    #[test]
    fn identity_change_at_same_address_creates_new_component() {
        let dir = tempdir().unwrap();
        let mut storage = open(dir.path(), 1024);
        storage.write_log(addr(1), &registration(10), &message("a")).unwrap();
        storage.write_log(addr(1), &registration(11), &message("b")).unwrap();

        let ids: Vec<u32> = reader(&storage).components().iter().map(|c| c.id).collect();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn reconnect_from_new_address_keeps_id() {
        let dir = tempdir().unwrap();
        let mut storage = open(dir.path(), 1024);
        storage.write_log(addr(1), &registration(10), &message("a")).unwrap();
        storage.write_log(addr(2), &registration(10), &message("b")).unwrap();
        assert_eq!(storage.component_count(), 1);

        assert!(storage.stop_logging_from_component(addr(2)));
        storage.write_log(addr(3), &registration(10), &message("c")).unwrap();

        let components = reader(&storage).components();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].addr, addr(3));
    }

    #[test]
    fn app_id_updates_record() {
        let dir = tempdir().unwrap();
        let mut storage = open(dir.path(), 1024);
        storage.register_component(addr(1), &registration(10));
        assert!(storage.set_app_id(addr(1), 1).unwrap());
        storage.write_log(addr(1), &registration(10), &message("a")).unwrap();
        assert_eq!(reader(&storage).components()[0].label(), "CellApp01");

        assert!(storage.set_app_id(addr(1), 2).unwrap());
        assert_eq!(reader(&storage).component(1).unwrap().app_id, 2);
        assert!(!storage.set_app_id(addr(9), 3).unwrap());
    }

    #[test]
    fn malformed_format_writes_nothing() {
        let dir = tempdir().unwrap();
        let mut storage = open(dir.path(), 1024);
        let bad = LogMessage::new(Priority::Error, "%y failed", Vec::new());
        assert!(matches!(
            storage.write_log(addr(1), &registration(10), &bad),
            Err(CoreError::Format(_))
        ));
        assert!(storage.format_strings().is_empty());
        assert!(!dir.path().join(dir::username_for_uid(UID)).exists());
    }

    #[test]
    fn active_files_follow_rotation_and_shutdown() {
        let dir = tempdir().unwrap();
        let mut storage = open(dir.path(), 60);
        let first = storage.write_log(addr(1), &registration(10), &message("a")).unwrap();
        let files = read_active_files(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with(&format!("entries.{}", first.suffix)));

        storage.write_log(addr(1), &registration(10), &message("b")).unwrap();
        let third = storage.write_log(addr(1), &registration(10), &message("c")).unwrap();
        assert_ne!(third.suffix, first.suffix);
        let files = read_active_files(dir.path()).unwrap();
        assert!(files[0].ends_with(&format!("entries.{}", third.suffix)));

        storage.roll().unwrap();
        assert!(read_active_files(dir.path()).unwrap().is_empty());

        drop(storage);
        assert!(!dir.path().join(dir::ACTIVE_FILES).exists());
        assert!(!dir.path().join(dir::PID_LOCK_FILE).exists());
    }
}
