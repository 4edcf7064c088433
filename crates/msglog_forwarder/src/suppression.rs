//! Per-format-string handlers and spam suppression patterns.

use msglog_format::FormatString;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Cached state for one distinct format string.
///
/// Handlers are shared between threads: the call counter and the
/// suppressible flag are atomics so a log call never takes a lock to
/// update them.
#[derive(Debug)]
pub struct FormatHandler {
    format: FormatString,
    suppressible: AtomicBool,
    recent_calls: AtomicU32,
}

impl FormatHandler {
    /// Creates a handler with no recent calls.
    pub fn new(format: FormatString, suppressible: bool) -> Self {
        Self {
            format,
            suppressible: AtomicBool::new(suppressible),
            recent_calls: AtomicU32::new(0),
        }
    }

    /// The parsed format string.
    pub fn format(&self) -> &FormatString {
        &self.format
    }

    /// Whether this format string matches a suppression pattern.
    pub fn is_suppressible(&self) -> bool {
        self.suppressible.load(Ordering::Relaxed)
    }

    /// Updates the suppressible flag after the pattern list changed.
    pub fn set_suppressible(&self, suppressible: bool) {
        self.suppressible.store(suppressible, Ordering::Relaxed);
    }

    /// Counts one call and returns the new count.
    pub fn add_recent_call(&self) -> u32 {
        self.recent_calls.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Calls counted since the last clear.
    pub fn recent_calls(&self) -> u32 {
        self.recent_calls.load(Ordering::Acquire)
    }

    /// Resets the call counter.
    pub fn clear_recent_calls(&self) {
        self.recent_calls.store(0, Ordering::Release);
    }

    /// True once a suppressible handler has been called more than
    /// `threshold` times in the current interval.
    pub fn is_spamming(&self, threshold: u32) -> bool {
        self.is_suppressible() && self.recent_calls() > threshold
    }
}

/// Ordered list of format string prefixes eligible for suppression.
///
/// An empty pattern makes every format string suppressible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuppressionPatterns {
    patterns: Vec<String>,
}

impl SuppressionPatterns {
    /// Creates an empty list; nothing is suppressible.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a prefix. Returns `false` if it was already present.
    pub fn add(&mut self, prefix: impl Into<String>) -> bool {
        let prefix = prefix.into();
        if self.patterns.contains(&prefix) {
            return false;
        }
        self.patterns.push(prefix);
        true
    }

    /// Removes a prefix. Returns `false` if it was not present.
    pub fn remove(&mut self, prefix: &str) -> bool {
        match self.patterns.iter().position(|p| p == prefix) {
            Some(index) => {
                self.patterns.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether `format` starts with any pattern.
    pub fn matches(&self, format: &str) -> bool {
        self.patterns.iter().any(|p| format.starts_with(p.as_str()))
    }

    /// The patterns in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(String::as_str)
    }

    /// Number of patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True if there are no patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for SuppressionPatterns {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut patterns = Self::new();
        for p in iter {
            patterns.add(p);
        }
        patterns
    }
}
