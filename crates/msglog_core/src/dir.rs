//! Log directory layout and ownership.
//!
//! ```text
//! <logdir>/
//! ├─ version           # on-disk format version
//! ├─ pid_lock          # pid of the writing collector
//! ├─ active_files      # segment files currently open for writing
//! ├─ strings           # format string registry
//! ├─ hostnames         # address -> hostname registry
//! ├─ component_names   # component type registry
//! ├─ categories        # category registry
//! └─ <username>/
//!    ├─ uid
//!    ├─ components
//!    ├─ entries.<suffix>
//!    ├─ args.<suffix>
//!    └─ metadata.<suffix>
//! ```

use crate::config::LOG_FORMAT_VERSION;
use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub(crate) const VERSION_FILE: &str = "version";
pub(crate) const PID_LOCK_FILE: &str = "pid_lock";
pub(crate) const ACTIVE_FILES: &str = "active_files";
const ACTIVE_FILES_TEMP: &str = "active_files.tmp";
pub(crate) const STRINGS_FILE: &str = "strings";
pub(crate) const HOSTNAMES_FILE: &str = "hostnames";
pub(crate) const COMPONENT_NAMES_FILE: &str = "component_names";
pub(crate) const CATEGORIES_FILE: &str = "categories";
pub(crate) const COMPONENTS_FILE: &str = "components";
pub(crate) const UID_FILE: &str = "uid";

/// Exclusive ownership of a log directory by one writing process.
///
/// The lock file holds the owner's pid. It is removed when the lock is
/// dropped; a lock left behind by a process that died is reported as
/// stale and must be cleared by hand with [`PidLock::clear_stale`].
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    file: File,
}

impl PidLock {
    /// Takes the lock for `root`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Locked`] if another live process holds it, or
    /// if a stale lock from a dead process is still present.
    pub fn acquire(root: &Path) -> CoreResult<Self> {
        let path = root.join(PID_LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let recorded = read_pid(&mut file);
        if file.try_lock_exclusive().is_err() {
            return Err(CoreError::Locked {
                pid: recorded,
                stale: false,
            });
        }
        if let Some(pid) = recorded.filter(|pid| *pid != std::process::id()) {
            let stale = !process_alive(pid);
            return Err(CoreError::Locked {
                pid: Some(pid),
                stale,
            });
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;
        debug!(path = %path.display(), "acquired pid lock");
        Ok(Self { path, file })
    }

    /// Pid recorded in `root`'s lock file, if any.
    pub fn owner(root: &Path) -> Option<u32> {
        let mut file = File::open(root.join(PID_LOCK_FILE)).ok()?;
        read_pid(&mut file)
    }

    /// Removes a lock file whose owner is no longer running.
    ///
    /// Returns `false` if there is no lock file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Locked`] if the owner is still alive.
    pub fn clear_stale(root: &Path) -> CoreResult<bool> {
        let path = root.join(PID_LOCK_FILE);
        if !path.exists() {
            return Ok(false);
        }
        let file = File::open(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(CoreError::Locked {
                pid: Self::owner(root),
                stale: false,
            });
        }
        if let Some(pid) = Self::owner(root).filter(|pid| process_alive(*pid)) {
            return Err(CoreError::Locked {
                pid: Some(pid),
                stale: false,
            });
        }
        fs::remove_file(&path)?;
        warn!(path = %path.display(), "removed stale pid lock");
        Ok(true)
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove pid lock");
        }
        let _ = FileExt::unlock(&self.file);
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut text = String::new();
    file.read_to_string(&mut text).ok()?;
    text.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Checks the `version` file, creating it when `create` is set.
///
/// # Errors
///
/// Returns [`CoreError::UnsupportedVersion`] for data newer than this
/// build, or [`CoreError::InvalidFormat`] if the file is missing or
/// unreadable.
pub(crate) fn check_version(root: &Path, create: bool) -> CoreResult<u32> {
    let path = root.join(VERSION_FILE);
    if !path.exists() {
        if !create {
            return Err(CoreError::invalid_format(format!(
                "{} has no version file",
                root.display()
            )));
        }
        fs::write(&path, format!("{LOG_FORMAT_VERSION}\n"))?;
        return Ok(LOG_FORMAT_VERSION);
    }

    let text = fs::read_to_string(&path)?;
    let found: u32 = text
        .trim()
        .parse()
        .map_err(|_| CoreError::invalid_format(format!("bad version file: {:?}", text.trim())))?;
    if found > LOG_FORMAT_VERSION {
        return Err(CoreError::UnsupportedVersion {
            found,
            supported: LOG_FORMAT_VERSION,
        });
    }
    Ok(found)
}

/// Rewrites `active_files` from scratch.
///
/// Each `(username, suffix)` pair lists the three files of that user's
/// open segment. The file is written to a temporary name and renamed, so
/// readers never see a partial list.
pub(crate) fn write_active_files(root: &Path, active: &[(String, String)]) -> CoreResult<()> {
    let temp = root.join(ACTIVE_FILES_TEMP);
    let mut file = File::create(&temp)?;
    for (username, suffix) in active {
        for kind in ["entries", "args", "metadata"] {
            writeln!(file, "{username}/{kind}.{suffix}")?;
        }
    }
    file.sync_all()?;
    drop(file);
    fs::rename(&temp, root.join(ACTIVE_FILES))?;
    sync_directory(root)
}

/// Removes `active_files` at clean shutdown.
pub(crate) fn delete_active_files(root: &Path) {
    let path = root.join(ACTIVE_FILES);
    if path.exists() {
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to remove active_files");
        }
    }
}

/// Reads the `active_files` list.
pub fn read_active_files(root: &Path) -> CoreResult<Vec<String>> {
    let path = root.join(ACTIVE_FILES);
    if !path.exists() {
        return Ok(Vec::new());
    }
    Ok(fs::read_to_string(path)?
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}

/// Name of the account with `uid`, falling back to `uid<N>`.
pub fn username_for_uid(uid: u16) -> String {
    fs::read_to_string("/etc/passwd")
        .ok()
        .and_then(|passwd| {
            passwd.lines().find_map(|line| {
                let mut fields = line.split(':');
                let name = fields.next()?;
                let id: u16 = fields.nth(1)?.parse().ok()?;
                (id == uid).then(|| name.to_string())
            })
        })
        .unwrap_or_else(|| format!("uid{uid}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pid_lock_is_exclusive_and_removed_on_drop() {
        let dir = tempdir().unwrap();
        let lock = PidLock::acquire(dir.path()).unwrap();
        assert_eq!(PidLock::owner(dir.path()), Some(std::process::id()));
        drop(lock);
        assert!(!dir.path().join(PID_LOCK_FILE).exists());
        PidLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn foreign_pid_is_never_broken_automatically() {
        let dir = tempdir().unwrap();
        // pids are capped well below this on Linux
        fs::write(dir.path().join(PID_LOCK_FILE), "4000000000\n").unwrap();

        match PidLock::acquire(dir.path()) {
            Err(CoreError::Locked { pid, .. }) => assert_eq!(pid, Some(4_000_000_000)),
            other => panic!("expected Locked, got {other:?}"),
        }
        assert!(dir.path().join(PID_LOCK_FILE).exists());

        #[cfg(target_os = "linux")]
        {
            assert!(PidLock::clear_stale(dir.path()).unwrap());
            PidLock::acquire(dir.path()).unwrap();
        }
    }

    #[test]
    fn version_file() {
        let dir = tempdir().unwrap();
        assert!(check_version(dir.path(), false).is_err());
        assert_eq!(check_version(dir.path(), true).unwrap(), LOG_FORMAT_VERSION);
        assert_eq!(check_version(dir.path(), false).unwrap(), LOG_FORMAT_VERSION);

        fs::write(dir.path().join(VERSION_FILE), "99\n").unwrap();
        assert!(matches!(
            check_version(dir.path(), false),
            Err(CoreError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn active_files_are_replaced_whole() {
        let dir = tempdir().unwrap();
        write_active_files(dir.path(), &[("alice".into(), "20261019000000".into())]).unwrap();
        write_active_files(dir.path(), &[("bob".into(), "20261019000001".into())]).unwrap();

        let files = read_active_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                "bob/entries.20261019000001",
                "bob/args.20261019000001",
                "bob/metadata.20261019000001",
            ]
        );
        assert!(!dir.path().join(ACTIVE_FILES_TEMP).exists());

        delete_active_files(dir.path());
        assert!(read_active_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn unknown_uid_has_fallback_name() {
        assert_eq!(username_for_uid(65_000), "uid65000");
    }
}
