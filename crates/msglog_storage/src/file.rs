//! Segment and registry files on disk.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// How a [`FileBackend`] was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    /// The collector's handle. Its cached length is authoritative.
    Writer,
    /// A reader's handle. Another process may be growing the file.
    Observer,
}

/// A log file opened either by its single writer or by a reader.
///
/// The collector appends entries, argument blobs and registry records
/// while any number of `msglog cat` processes read the same files. An
/// observer handle therefore never trusts the length it saw at open time:
/// [`size`](StorageBackend::size) re-stats the file, and a read that runs
/// past the known length re-stats once before failing.
///
/// # Example
///
/// ```no_run
/// use msglog_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut entries = FileBackend::open(Path::new("entries.20240101120000")).unwrap();
/// let offset = entries.append(&[0u8; 38]).unwrap();
/// entries.flush().unwrap();
///
/// let reader = FileBackend::open_read_only(Path::new("entries.20240101120000")).unwrap();
/// assert_eq!(reader.read_at(offset, 38).unwrap().len(), 38);
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<Inner>,
    access: Access,
}

#[derive(Debug)]
struct Inner {
    file: File,
    len: u64,
}

impl Inner {
    fn restat(&mut self) -> StorageResult<u64> {
        self.len = self.file.metadata()?.len();
        Ok(self.len)
    }
}

impl FileBackend {
    /// Opens `path` for appending, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        Self::wrap(path, file, Access::Writer)
    }

    /// Opens an existing file for reading while another handle writes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = File::open(path)?;
        Self::wrap(path, file, Access::Observer)
    }

    fn wrap(path: &Path, file: File, access: Access) -> StorageResult<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { file, len }),
            access,
        })
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True for handles from [`FileBackend::open_read_only`].
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.access == Access::Observer
    }

    /// Last modification time, used by registries to skip needless rescans.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub fn modified(&self) -> StorageResult<SystemTime> {
        Ok(self.inner.lock().file.metadata()?.modified()?)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let end = offset.saturating_add(len as u64);
        let size = if end > inner.len && self.access == Access::Observer {
            inner.restat()?
        } else {
            inner.len
        };
        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let mut buf = vec![0u8; len];
        if len > 0 {
            inner.file.seek(SeekFrom::Start(offset))?;
            inner.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.access == Access::Observer {
            return Err(StorageError::ReadOnly(self.path.display().to_string()));
        }
        let inner = self.inner.get_mut();
        let offset = inner.len;
        inner.file.write_all(data)?;
        inner.len += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        match self.access {
            Access::Writer => Ok(self.inner.get_mut().file.flush()?),
            Access::Observer => Ok(()),
        }
    }

    fn size(&self) -> StorageResult<u64> {
        let mut inner = self.inner.lock();
        match self.access {
            Access::Writer => Ok(inner.len),
            Access::Observer => inner.restat(),
        }
    }

    fn sync(&mut self) -> StorageResult<()> {
        match self.access {
            Access::Writer => Ok(self.inner.get_mut().file.sync_data()?),
            Access::Observer => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn offsets_follow_appends() {
        let dir = tempdir().unwrap();
        let mut args = FileBackend::open(&dir.path().join("args.test")).unwrap();

        assert_eq!(args.size().unwrap(), 0);
        assert_eq!(args.append(b"flush").unwrap(), 0);
        assert_eq!(args.append(&5i32.to_le_bytes()).unwrap(), 5);
        assert_eq!(args.size().unwrap(), 9);
        assert_eq!(args.read_at(0, 5).unwrap(), b"flush");
    }

    #[test]
    fn short_file_read_fails() {
        let dir = tempdir().unwrap();
        let mut args = FileBackend::open(&dir.path().join("args.test")).unwrap();
        args.append(b"abc").unwrap();

        assert!(matches!(
            args.read_at(2, 5),
            Err(StorageError::ReadPastEnd { offset: 2, len: 5, size: 3 })
        ));
        assert!(args.read_at(3, 0).unwrap().is_empty());
    }

    #[test]
    fn reopened_writer_continues_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strings");

        {
            let mut strings = FileBackend::open(&path).unwrap();
            strings.append(b"first").unwrap();
            strings.sync().unwrap();
        }

        let mut strings = FileBackend::open(&path).unwrap();
        assert_eq!(strings.append(b"second").unwrap(), 5);
        assert_eq!(strings.read_at(0, 11).unwrap(), b"firstsecond");
    }

    #[test]
    fn observer_sees_writer_growth() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.grow");

        let mut writer = FileBackend::open(&path).unwrap();
        writer.append(b"first").unwrap();
        writer.flush().unwrap();

        let reader = FileBackend::open_read_only(&path).unwrap();
        assert_eq!(reader.size().unwrap(), 5);

        writer.append(b"second").unwrap();
        writer.flush().unwrap();

        assert_eq!(reader.read_at(5, 6).unwrap(), b"second");
        assert_eq!(reader.size().unwrap(), 11);
        assert!(reader.modified().is_ok());
    }

    #[test]
    fn observer_cannot_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("uid");
        FileBackend::open(&path).unwrap();

        let mut reader = FileBackend::open_read_only(&path).unwrap();
        assert!(reader.is_read_only());
        assert!(matches!(reader.append(b"x"), Err(StorageError::ReadOnly(_))));
        assert!(FileBackend::open_read_only(&dir.path().join("missing")).is_err());
    }

    proptest! {
        #[test]
        fn appended_records_read_back(
            records in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..16)
        ) {
            let dir = tempdir().unwrap();
            let mut backend = FileBackend::open(&dir.path().join("records")).unwrap();
            let offsets: Vec<u64> = records.iter().map(|r| backend.append(r).unwrap()).collect();
            for (record, offset) in records.iter().zip(offsets) {
                prop_assert_eq!(&backend.read_at(offset, record.len()).unwrap(), record);
            }
        }
    }
}
