//! Per-user component directory records.

use super::RegistryRecord;
use crate::dir::COMPONENTS_FILE;
use crate::error::{CoreError, CoreResult};
use crate::types::EntryAddress;
use msglog_protocol::ComponentRegistration;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::net::SocketAddr;

/// A logging component as persisted in a user's `components` file.
///
/// Records are CBOR. A component is rewritten when its app instance id
/// changes; the last record for an id wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    /// Id referenced by log entries.
    pub id: u32,
    /// Address the component last logged from.
    pub addr: SocketAddr,
    /// The producer's registration.
    pub registration: ComponentRegistration,
    /// Id in the `component_names` registry.
    pub type_id: u8,
    /// App instance id, 0 until assigned.
    pub app_id: u32,
    /// Address of the component's first entry.
    pub first_entry: EntryAddress,
}

impl ComponentRecord {
    /// Component name, e.g. `cellapp`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.registration.component_name
    }

    /// Process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.registration.pid
    }

    /// Display label, e.g. `CellApp01` for app id 1.
    #[must_use]
    pub fn label(&self) -> String {
        component_label(self.name(), self.app_id)
    }
}

/// Display label for a component name and app id: `cellapp` with app id
/// 1 is `CellApp01`; app id 0 adds no number.
#[must_use]
pub fn component_label(name: &str, app_id: u32) -> String {
    let mut label = String::new();
    for part in name.split(['_', '-']) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            label.extend(first.to_uppercase());
            label.push_str(chars.as_str());
        }
    }
    if let Some(rest) = label.strip_suffix("app") {
        label = format!("{rest}App");
    }
    if app_id > 0 {
        let _ = write!(label, "{app_id:02}");
    }
    label
}

impl RegistryRecord for ComponentRecord {
    fn encode(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        ciborium::into_writer(self, buf)
            .map_err(|e| CoreError::registry_corruption(COMPONENTS_FILE, e.to_string()))
    }

    fn decode(payload: &[u8]) -> CoreResult<Self> {
        ciborium::from_reader(payload)
            .map_err(|e| CoreError::registry_corruption(COMPONENTS_FILE, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use tempfile::tempdir;

    fn record(name: &str, app_id: u32) -> ComponentRecord {
        ComponentRecord {
            id: 1,
            addr: "10.0.0.1:4000".parse().unwrap(),
            registration: ComponentRegistration::new(name, 1000, 42),
            type_id: 0,
            app_id,
            first_entry: EntryAddress::new("20261019120000", 0),
        }
    }

    #[test]
    fn labels() {
        assert_eq!(record("cellapp", 1).label(), "CellApp01");
        assert_eq!(record("baseapp", 12).label(), "BaseApp12");
        assert_eq!(record("dbmgr", 0).label(), "Dbmgr");
        assert_eq!(record("service_app", 3).label(), "ServiceApp03");
    }

    #[test]
    fn cbor_records_survive_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(COMPONENTS_FILE);
        let mut reg = Registry::open(&path).unwrap();
        reg.append(record("cellapp", 0)).unwrap();
        reg.append(record("cellapp", 1)).unwrap();

        let reloaded: Registry<ComponentRecord> = Registry::open_read_only(&path).unwrap();
        assert_eq!(reloaded.records()[1].1, record("cellapp", 1));
    }
}
