//! Append-only registries shared between the collector and readers.
//!
//! Every registry file is a sequence of length-prefixed records:
//!
//! ```text
//! | len u32 | payload (len bytes) | len u32 | payload | ...
//! ```
//!
//! A record's file offset is its permanent key. The writer appends; readers
//! call [`Registry::refresh`] to pick up records written since their last
//! load. A record the writer has only partly written is left for the next
//! refresh.

mod categories;
mod components;
mod hostnames;
mod names;
mod strings;

pub use categories::Categories;
pub use components::{component_label, ComponentRecord};
pub use hostnames::{HostResolver, Hostnames, SystemResolver};
pub use names::ComponentNames;
pub use strings::FormatStrings;

use crate::error::{CoreError, CoreResult};
use bytes::BufMut;
use msglog_storage::{FileBackend, StorageBackend};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

const LEN_PREFIX: usize = 4;

/// A record type stored in a [`Registry`].
pub trait RegistryRecord: Sized {
    /// Appends the payload (without the length prefix) to `buf`.
    fn encode(&self, buf: &mut Vec<u8>) -> CoreResult<()>;

    /// Decodes one payload.
    fn decode(payload: &[u8]) -> CoreResult<Self>;
}

/// Plain UTF-8 text records.
impl RegistryRecord for String {
    fn encode(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        buf.put_slice(self.as_bytes());
        Ok(())
    }

    fn decode(payload: &[u8]) -> CoreResult<Self> {
        String::from_utf8(payload.to_vec())
            .map_err(|e| CoreError::registry_corruption("text record", e.to_string()))
    }
}

/// A registry file plus the records loaded from it so far.
#[derive(Debug)]
pub struct Registry<R> {
    path: PathBuf,
    backend: Option<FileBackend>,
    writable: bool,
    records: Vec<(u64, R)>,
    loaded: u64,
    modified: Option<SystemTime>,
}

impl<R: RegistryRecord> Registry<R> {
    /// Opens a registry for appending, creating the file if needed.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let mut registry = Self::unloaded(path, true);
        registry.backend = Some(FileBackend::open(path)?);
        registry.refresh()?;
        Ok(registry)
    }

    /// Opens a registry for reading. A missing file is an empty registry
    /// that fills in once the writer creates it.
    pub fn open_read_only(path: &Path) -> CoreResult<Self> {
        let mut registry = Self::unloaded(path, false);
        registry.refresh()?;
        Ok(registry)
    }

    fn unloaded(path: &Path, writable: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            backend: None,
            writable,
            records: Vec::new(),
            loaded: 0,
            modified: None,
        }
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned())
    }

    /// Loads records appended since the last load.
    ///
    /// Returns the index of the first new record in [`Registry::records`];
    /// equal to the record count if nothing was added.
    pub fn refresh(&mut self) -> CoreResult<usize> {
        let first_new = self.records.len();
        if self.backend.is_none() {
            if !self.path.exists() {
                return Ok(first_new);
            }
            self.backend = Some(FileBackend::open_read_only(&self.path)?);
        }
        let Some(backend) = self.backend.as_ref() else {
            return Ok(first_new);
        };

        let size = backend.size()?;
        let modified = backend.modified().ok();
        if size == self.loaded && modified == self.modified {
            return Ok(first_new);
        }
        if size < self.loaded {
            return Err(CoreError::registry_corruption(
                self.file_name(),
                format!("file shrank from {} to {size} bytes", self.loaded),
            ));
        }

        let tail = backend.read_at(self.loaded, (size - self.loaded) as usize)?;
        let mut pos = 0usize;
        while pos + LEN_PREFIX <= tail.len() {
            let len = u32::from_le_bytes([tail[pos], tail[pos + 1], tail[pos + 2], tail[pos + 3]]) as usize;
            let end = pos + LEN_PREFIX + len;
            if end > tail.len() {
                break;
            }
            let record = R::decode(&tail[pos + LEN_PREFIX..end])?;
            self.records.push((self.loaded + pos as u64, record));
            pos = end;
        }
        self.loaded += pos as u64;
        self.modified = modified;

        let added = self.records.len() - first_new;
        if added > 0 {
            debug!(file = %self.file_name(), added, "loaded registry records");
        }
        Ok(first_new)
    }

    /// Appends `record`, returning its offset.
    ///
    /// # Errors
    ///
    /// Fails with [`msglog_storage::StorageError::ReadOnly`] on a reader.
    pub fn append(&mut self, record: R) -> CoreResult<u64> {
        let mut payload = Vec::new();
        record.encode(&mut payload)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            CoreError::registry_corruption(self.file_name(), "record larger than 4 GiB")
        })?;

        let mut framed = Vec::with_capacity(LEN_PREFIX + payload.len());
        framed.put_u32_le(len);
        framed.put_slice(&payload);

        let backend = match self.backend.as_mut() {
            Some(backend) if self.writable => backend,
            _ => {
                return Err(msglog_storage::StorageError::ReadOnly(self.path.display().to_string()).into())
            }
        };
        let offset = backend.append(&framed)?;
        backend.flush()?;

        self.loaded = offset + framed.len() as u64;
        self.modified = backend.modified().ok();
        self.records.push((offset, record));
        Ok(offset)
    }

    /// Records in file order with their offsets.
    #[must_use]
    pub fn records(&self) -> &[(u64, R)] {
        &self.records
    }

    /// The record stored at `offset`.
    #[must_use]
    pub fn get(&self, offset: u64) -> Option<&R> {
        self.records
            .binary_search_by_key(&offset, |(o, _)| *o)
            .ok()
            .map(|i| &self.records[i].1)
    }

    /// Number of loaded records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
