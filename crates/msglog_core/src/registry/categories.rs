//! Category registry.

use super::Registry;
use crate::dir::CATEGORIES_FILE;
use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::path::Path;

/// Message categories. Id 0 means "no category"; stored names start at 1.
#[derive(Debug)]
pub struct Categories {
    registry: Registry<String>,
    ids: HashMap<String, u16>,
}

impl Categories {
    /// Opens `categories` in `root` for writing.
    pub fn open(root: &Path) -> CoreResult<Self> {
        Self::index(Registry::open(&root.join(CATEGORIES_FILE))?)
    }

    /// Opens `categories` in `root` for reading.
    pub fn open_read_only(root: &Path) -> CoreResult<Self> {
        Self::index(Registry::open_read_only(&root.join(CATEGORIES_FILE))?)
    }

    fn index(registry: Registry<String>) -> CoreResult<Self> {
        let mut categories = Self {
            registry,
            ids: HashMap::new(),
        };
        categories.index_from(0)?;
        Ok(categories)
    }

    fn index_from(&mut self, first: usize) -> CoreResult<()> {
        for (i, (_, name)) in self.registry.records().iter().enumerate().skip(first) {
            let id = category_id(i)?;
            self.ids.entry(name.clone()).or_insert(id);
        }
        Ok(())
    }

    /// Id of `name`, registering it on first sight. The empty name is 0.
    pub fn id_for(&mut self, name: &str) -> CoreResult<u16> {
        if name.is_empty() {
            return Ok(0);
        }
        if let Some(id) = self.ids.get(name) {
            return Ok(*id);
        }
        let id = category_id(self.registry.len())?;
        self.registry.append(name.to_string())?;
        self.ids.insert(name.to_string(), id);
        Ok(id)
    }

    /// Id of an already registered name.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<u16> {
        self.ids.get(name).copied()
    }

    /// Name with id `id`; empty for 0.
    #[must_use]
    pub fn name(&self, id: u16) -> Option<&str> {
        match id {
            0 => Some(""),
            id => self
                .registry
                .records()
                .get(usize::from(id) - 1)
                .map(|(_, n)| n.as_str()),
        }
    }

    /// All names in id order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.registry.records().iter().map(|(_, n)| n.clone()).collect()
    }

    /// Picks up categories added by the writer.
    pub fn refresh(&mut self) -> CoreResult<()> {
        let first = self.registry.refresh()?;
        self.index_from(first)
    }
}

fn category_id(index: usize) -> CoreResult<u16> {
    u16::try_from(index + 1)
        .map_err(|_| CoreError::registry_corruption(CATEGORIES_FILE, "too many categories"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_category_is_zero() {
        let dir = tempdir().unwrap();
        let mut categories = Categories::open(dir.path()).unwrap();
        assert_eq!(categories.id_for("").unwrap(), 0);
        assert_eq!(categories.id_for("physics").unwrap(), 1);
        assert_eq!(categories.id_for("net").unwrap(), 2);
        assert_eq!(categories.id_for("physics").unwrap(), 1);
        assert_eq!(categories.name(0), Some(""));
        assert_eq!(categories.name(2), Some("net"));
        assert_eq!(categories.name(3), None);
        assert_eq!(categories.id_of("unknown"), None);
    }
}
