//! Read-only access to a log directory.

use crate::config::LOG_FORMAT_VERSION;
use crate::dir::check_version;
use crate::error::{CoreError, CoreResult};
use crate::query::{Query, QueryParams};
use crate::registry::{Categories, ComponentNames, FormatStrings, Hostnames};
use crate::user_log::{list_users, UserLogReader};
use msglog_format::{FormatString, StreamVersion};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A reader of a log directory.
///
/// Any number of readers may run next to the collector. Registries are
/// refreshed in place with [`LogReader::refresh`].
#[derive(Debug)]
pub struct LogReader {
    root: PathBuf,
    version: u32,
    strings: RwLock<FormatStrings>,
    hostnames: RwLock<Hostnames>,
    component_names: RwLock<ComponentNames>,
    categories: RwLock<Categories>,
}

impl LogReader {
    /// Opens the log directory at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedVersion`] if the directory was
    /// written by a newer format.
    pub fn open(root: impl AsRef<Path>) -> CoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        let version = check_version(&root, false)?;
        Ok(Self {
            strings: RwLock::new(FormatStrings::open_read_only(&root)?),
            hostnames: RwLock::new(Hostnames::open_read_only(&root)?),
            component_names: RwLock::new(ComponentNames::open_read_only(&root)?),
            categories: RwLock::new(Categories::open_read_only(&root)?),
            root,
            version,
        })
    }

    /// The log directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk format version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Argument stream layout used by this directory.
    #[must_use]
    pub fn stream_version(&self) -> StreamVersion {
        if self.version < LOG_FORMAT_VERSION {
            StreamVersion::Legacy32
        } else {
            StreamVersion::Wide
        }
    }

    /// Users with logs: name to uid.
    pub fn users(&self) -> CoreResult<BTreeMap<String, u16>> {
        list_users(&self.root)
    }

    /// The log of user `uid`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownUser`] if `uid` has never logged.
    pub fn user_log(&self, uid: u16) -> CoreResult<UserLogReader> {
        let username = self
            .users()?
            .into_iter()
            .find_map(|(name, u)| (u == uid).then_some(name))
            .ok_or(CoreError::UnknownUser { uid })?;
        UserLogReader::open(&self.root, &username, self.stream_version())
    }

    /// Every stored format string, sorted.
    #[must_use]
    pub fn format_strings(&self) -> Vec<String> {
        self.strings.read().sorted()
    }

    /// The format string stored at `offset`, refreshing once if the writer
    /// added it after the last load.
    pub fn format_string(&self, offset: u32) -> CoreResult<Option<Arc<FormatString>>> {
        if let Some(found) = self.strings.read().get(offset) {
            return Ok(Some(found));
        }
        let mut strings = self.strings.write();
        strings.refresh()?;
        Ok(strings.get(offset))
    }

    /// Every known (address, hostname) pair.
    #[must_use]
    pub fn hostnames(&self) -> Vec<(Ipv4Addr, String)> {
        self.hostnames.read().all()
    }

    /// Hostname stored for `addr`.
    #[must_use]
    pub fn hostname(&self, addr: Ipv4Addr) -> Option<String> {
        self.hostnames.read().name(addr).map(str::to_string)
    }

    /// Address of a hostname or dotted address that has logged.
    #[must_use]
    pub fn address_for_host(&self, host: &str) -> Option<Ipv4Addr> {
        self.hostnames.read().address_for_host(host)
    }

    /// Component names in type id order.
    #[must_use]
    pub fn component_names(&self) -> Vec<String> {
        self.component_names.read().names()
    }

    /// Type id of a component name.
    #[must_use]
    pub fn component_type_id(&self, name: &str) -> Option<u8> {
        self.component_names.read().id_of(name)
    }

    /// Category names in id order.
    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        self.categories.read().names()
    }

    /// Id of a category name.
    #[must_use]
    pub fn category_id(&self, name: &str) -> Option<u16> {
        self.categories.read().id_of(name)
    }

    /// Name of category `id`.
    #[must_use]
    pub fn category_name(&self, id: u16) -> Option<String> {
        self.categories.read().name(id).map(str::to_string)
    }

    /// Picks up registry records added since the last load.
    pub fn refresh(&self) -> CoreResult<()> {
        self.strings.write().refresh()?;
        self.hostnames.write().refresh()?;
        self.component_names.write().refresh()?;
        self.categories.write().refresh()
    }

    /// Starts a query over `log`.
    ///
    /// # Errors
    ///
    /// Fails for an unknown host, segment suffix or out-of-range address,
    /// and for invalid regular expressions.
    pub fn query<'a>(&'a self, log: &'a UserLogReader, params: &QueryParams) -> CoreResult<Query<'a>> {
        Query::new(self, log, params)
    }
}
