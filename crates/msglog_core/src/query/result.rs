//! Query output.

use crate::registry::component_label;
use crate::types::{EntryAddress, LogTime};
use msglog_protocol::{MessageSource, Priority};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// One entry, resolved into text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Where the entry is stored.
    pub address: EntryAddress,
    /// When the collector received it.
    pub time: LogTime,
    /// Host name of the producer.
    pub host: String,
    /// Owner of the producing process.
    pub username: String,
    /// Producer pid.
    pub pid: u32,
    /// Producer app instance id, 0 if unassigned.
    pub app_id: u32,
    /// Component name, e.g. `cellapp`.
    pub component: String,
    /// Severity.
    pub severity: Priority,
    /// Category name, empty for none.
    pub category: String,
    /// Native or script origin.
    pub source: MessageSource,
    /// Message text.
    pub message: String,
    /// Metadata rendered as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl QueryResult {
    /// Component label, e.g. `CellApp01`.
    #[must_use]
    pub fn component_label(&self) -> String {
        component_label(&self.component, self.app_id)
    }

    /// One line of text output:
    ///
    /// ```text
    /// Mon 19 Oct 2026 12:00:01.250 game01  alice  4242 CellApp01  ERROR    [net] flush failed with code 5
    /// ```
    #[must_use]
    pub fn format_line(&self) -> String {
        let mut line = format!(
            "{} {:<8} {:<8} {:>5} {:<10} {:<8} ",
            self.time,
            self.host,
            self.username,
            self.pid,
            self.component_label(),
            self.severity.name(),
        );
        if !self.category.is_empty() {
            let _ = write!(line, "[{}] ", self.category);
        }
        line.push_str(&self.message);
        if let Some(metadata) = &self.metadata {
            let _ = write!(line, " {metadata}");
        }
        line
    }
}

/// An item produced by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum QueryItem {
    /// An entry that passed every filter.
    Match(QueryResult),
    /// A neighbouring entry shown for context.
    Context(QueryResult),
    /// A gap between two non-adjacent context groups.
    Separator,
}

impl QueryItem {
    /// The result, unless this is a separator.
    #[must_use]
    pub fn result(&self) -> Option<&QueryResult> {
        match self {
            QueryItem::Match(r) | QueryItem::Context(r) => Some(r),
            QueryItem::Separator => None,
        }
    }

    /// Whether the item is a match.
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, QueryItem::Match(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> QueryResult {
        QueryResult {
            address: EntryAddress::new("20261019120000", 3),
            time: LogTime::new(0, 0),
            host: "game01".into(),
            username: "alice".into(),
            pid: 4242,
            app_id: 1,
            component: "cellapp".into(),
            severity: Priority::Error,
            category: String::new(),
            source: MessageSource::Cpp,
            message: "flush failed with code 5".into(),
            metadata: None,
        }
    }

    #[test]
    fn line_layout() {
        let line = result().format_line();
        assert!(line.ends_with("game01   alice     4242 CellApp01  ERROR    flush failed with code 5"), "{line}");

        let mut categorised = result();
        categorised.category = "net".into();
        categorised.metadata = Some(r#"{"k":1}"#.into());
        assert!(categorised.format_line().ends_with(r#"[net] flush failed with code 5 {"k":1}"#));
    }

    #[test]
    fn json_items_are_tagged() {
        let json = serde_json::to_value(QueryItem::Match(result())).unwrap();
        assert_eq!(json["kind"], "match");
        assert_eq!(json["message"], "flush failed with code 5");
        assert!(json.get("metadata").is_none());
        assert_eq!(serde_json::to_value(QueryItem::Separator).unwrap()["kind"], "separator");
    }
}
