//! Protocol versions and the feature gates derived from them.

use serde::{Deserialize, Serialize};

/// Minor version from which the logger id is a string rather than a byte.
pub const STRING_LOGGER_ID_VERSION: u8 = 7;

/// Minor version from which collectors no longer need the extra UDP
/// socket to learn about detaching components.
pub const WITHOUT_EXTRA_UDP_VERSION: u8 = 6;

/// Minor version that introduced JSON string metadata.
pub const STRING_METADATA_VERSION: u8 = 8;

/// Version of a message logger peer.
///
/// A collector advertises its version when it is discovered; a producer
/// states its own in the registration frame. Encoders pick the payload
/// layout the *receiver* understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl ProtocolVersion {
    /// The version spoken by this implementation.
    pub const CURRENT: Self = Self::new(2, 9);

    /// Creates a version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Whether a producer must also open a UDP socket to this collector.
    #[must_use]
    pub const fn should_open_udp(self) -> bool {
        self.major < 2 || self.minor < WITHOUT_EXTRA_UDP_VERSION
    }

    /// Whether log messages carry a trailing metadata block.
    #[must_use]
    pub const fn supports_metadata(self) -> bool {
        self.minor >= STRING_METADATA_VERSION
    }

    /// Whether the metadata block may carry streamed key/value arguments
    /// rather than only a JSON string.
    #[must_use]
    pub const fn supports_metadata_args(self) -> bool {
        self.minor > STRING_METADATA_VERSION
    }

    /// Whether the registration frame carries a string logger id.
    #[must_use]
    pub const fn has_string_logger_id(self) -> bool {
        self.minor >= STRING_LOGGER_ID_VERSION
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_version_features() {
        let v = ProtocolVersion::CURRENT;
        assert!(!v.should_open_udp());
        assert!(v.supports_metadata());
        assert!(v.supports_metadata_args());
        assert!(v.has_string_logger_id());
    }

    #[test]
    fn metadata_gates() {
        let json_only = ProtocolVersion::new(2, STRING_METADATA_VERSION);
        assert!(json_only.supports_metadata());
        assert!(!json_only.supports_metadata_args());

        let none = ProtocolVersion::new(2, STRING_METADATA_VERSION - 1);
        assert!(!none.supports_metadata());
    }

    #[test]
    fn old_collectors_need_udp() {
        assert!(ProtocolVersion::new(1, 9).should_open_udp());
        assert!(ProtocolVersion::new(2, 5).should_open_udp());
        assert!(!ProtocolVersion::new(2, 6).should_open_udp());
    }
}
