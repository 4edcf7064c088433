//! Format string registry.

use super::Registry;
use crate::dir::STRINGS_FILE;
use crate::error::{CoreError, CoreResult};
use msglog_format::FormatString;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Every format string the collector has stored, keyed both ways.
///
/// Strings are parsed before they are registered, so a malformed string
/// never gets an offset.
#[derive(Debug)]
pub struct FormatStrings {
    registry: Registry<String>,
    by_text: HashMap<String, u32>,
    by_offset: HashMap<u32, Arc<FormatString>>,
}

impl FormatStrings {
    /// Opens `strings` in `root` for writing.
    pub fn open(root: &Path) -> CoreResult<Self> {
        Self::index(Registry::open(&root.join(STRINGS_FILE))?)
    }

    /// Opens `strings` in `root` for reading.
    pub fn open_read_only(root: &Path) -> CoreResult<Self> {
        Self::index(Registry::open_read_only(&root.join(STRINGS_FILE))?)
    }

    fn index(registry: Registry<String>) -> CoreResult<Self> {
        let mut strings = Self {
            registry,
            by_text: HashMap::new(),
            by_offset: HashMap::new(),
        };
        strings.index_from(0)?;
        Ok(strings)
    }

    fn index_from(&mut self, first: usize) -> CoreResult<()> {
        for (offset, text) in &self.registry.records()[first..] {
            let offset = u32::try_from(*offset)
                .map_err(|_| CoreError::registry_corruption(STRINGS_FILE, "offset beyond 4 GiB"))?;
            match FormatString::parse(text) {
                Ok(parsed) => {
                    self.by_text.insert(text.clone(), offset);
                    self.by_offset.insert(offset, Arc::new(parsed));
                }
                Err(e) => warn!(offset, error = %e, "skipping unparsable stored format string"),
            }
        }
        Ok(())
    }

    /// Offset of `text`, registering it on first sight.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Format`] for a malformed string; nothing is
    /// written in that case.
    pub fn offset_for(&mut self, text: &str) -> CoreResult<u32> {
        if let Some(offset) = self.by_text.get(text) {
            return Ok(*offset);
        }
        let parsed = FormatString::parse(text)?;
        let offset = self.registry.append(text.to_string())?;
        let offset = u32::try_from(offset)
            .map_err(|_| CoreError::registry_corruption(STRINGS_FILE, "offset beyond 4 GiB"))?;
        self.by_text.insert(text.to_string(), offset);
        self.by_offset.insert(offset, Arc::new(parsed));
        Ok(offset)
    }

    /// The parsed format string stored at `offset`.
    #[must_use]
    pub fn get(&self, offset: u32) -> Option<Arc<FormatString>> {
        self.by_offset.get(&offset).cloned()
    }

    /// All stored strings, sorted.
    #[must_use]
    pub fn sorted(&self) -> Vec<String> {
        let mut all: Vec<String> = self.by_text.keys().cloned().collect();
        all.sort();
        all
    }

    /// Number of stored strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_text.len()
    }

    /// Whether no strings are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_text.is_empty()
    }

    /// Picks up strings added by the writer.
    pub fn refresh(&mut self) -> CoreResult<()> {
        let first = self.registry.refresh()?;
        self.index_from(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn strings_are_written_once() {
        let dir = tempdir().unwrap();
        let mut strings = FormatStrings::open(dir.path()).unwrap();
        let a = strings.offset_for("%s failed with code %d").unwrap();
        let b = strings.offset_for("tick %d").unwrap();
        assert_eq!(strings.offset_for("%s failed with code %d").unwrap(), a);
        assert_ne!(a, b);
        assert_eq!(strings.get(b).unwrap().as_str(), "tick %d");

        let reopened = FormatStrings::open_read_only(dir.path()).unwrap();
        assert_eq!(reopened.sorted(), ["%s failed with code %d", "tick %d"]);
    }

    #[test]
    fn malformed_string_is_not_registered() {
        let dir = tempdir().unwrap();
        let mut strings = FormatStrings::open(dir.path()).unwrap();
        assert!(matches!(strings.offset_for("bad %"), Err(CoreError::Format(_))));
        assert!(strings.is_empty());
        assert_eq!(std::fs::metadata(dir.path().join(STRINGS_FILE)).unwrap().len(), 0);
    }

    #[test]
    fn reader_refresh_sees_new_strings() {
        let dir = tempdir().unwrap();
        let mut writer = FormatStrings::open(dir.path()).unwrap();
        let mut reader = FormatStrings::open_read_only(dir.path()).unwrap();
        let offset = writer.offset_for("late %u").unwrap();
        assert!(reader.get(offset).is_none());
        reader.refresh().unwrap();
        assert_eq!(reader.get(offset).unwrap().as_str(), "late %u");
    }
}
