//! Component type registry.

use super::Registry;
use crate::dir::COMPONENT_NAMES_FILE;
use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::path::Path;

/// Distinct component names (`cellapp`, `baseapp`, ...) with small ids.
///
/// The id is the record's position in the file. Query process masks test
/// bit `1 << id`.
#[derive(Debug)]
pub struct ComponentNames {
    registry: Registry<String>,
    ids: HashMap<String, u8>,
}

impl ComponentNames {
    /// Opens `component_names` in `root` for writing.
    pub fn open(root: &Path) -> CoreResult<Self> {
        Self::index(Registry::open(&root.join(COMPONENT_NAMES_FILE))?)
    }

    /// Opens `component_names` in `root` for reading.
    pub fn open_read_only(root: &Path) -> CoreResult<Self> {
        Self::index(Registry::open_read_only(&root.join(COMPONENT_NAMES_FILE))?)
    }

    fn index(registry: Registry<String>) -> CoreResult<Self> {
        let mut names = Self {
            registry,
            ids: HashMap::new(),
        };
        names.index_from(0)?;
        Ok(names)
    }

    fn index_from(&mut self, first: usize) -> CoreResult<()> {
        for (i, (_, name)) in self.registry.records().iter().enumerate().skip(first) {
            let id = u8::try_from(i)
                .map_err(|_| CoreError::registry_corruption(COMPONENT_NAMES_FILE, "too many names"))?;
            self.ids.entry(name.clone()).or_insert(id);
        }
        Ok(())
    }

    /// Id of `name`, registering it on first sight.
    pub fn id_for(&mut self, name: &str) -> CoreResult<u8> {
        if let Some(id) = self.ids.get(name) {
            return Ok(*id);
        }
        let id = u8::try_from(self.registry.len())
            .map_err(|_| CoreError::registry_corruption(COMPONENT_NAMES_FILE, "too many names"))?;
        self.registry.append(name.to_string())?;
        self.ids.insert(name.to_string(), id);
        Ok(id)
    }

    /// Id of an already registered name.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<u8> {
        self.ids.get(name).copied()
    }

    /// Name with id `id`.
    #[must_use]
    pub fn name(&self, id: u8) -> Option<&str> {
        self.registry.records().get(usize::from(id)).map(|(_, n)| n.as_str())
    }

    /// All names in id order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.registry.records().iter().map(|(_, n)| n.clone()).collect()
    }

    /// Picks up names added by the writer.
    pub fn refresh(&mut self) -> CoreResult<()> {
        let first = self.registry.refresh()?;
        self.index_from(first)
    }
}
