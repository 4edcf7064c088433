//! Message priorities and sources.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    /// Very fine grained tracing.
    Trace = 0,
    /// Debugging output.
    Debug = 1,
    /// Informational.
    Info = 2,
    /// Normal but significant.
    Notice = 3,
    /// Warning.
    Warning = 4,
    /// Error.
    Error = 5,
    /// Critical failure.
    Critical = 6,
    /// Temporary hack notices.
    Hack = 7,
    /// Output of the scripting layer.
    Script = 8,
    /// Asset problems.
    Asset = 9,
}

impl Priority {
    /// Number of priorities; also the width of a severity bitmask.
    pub const COUNT: usize = 10;

    /// All priorities in ascending order.
    pub const ALL: [Priority; Self::COUNT] = [
        Priority::Trace,
        Priority::Debug,
        Priority::Info,
        Priority::Notice,
        Priority::Warning,
        Priority::Error,
        Priority::Critical,
        Priority::Hack,
        Priority::Script,
        Priority::Asset,
    ];

    /// Upper-case display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Priority::Trace => "TRACE",
            Priority::Debug => "DEBUG",
            Priority::Info => "INFO",
            Priority::Notice => "NOTICE",
            Priority::Warning => "WARNING",
            Priority::Error => "ERROR",
            Priority::Critical => "CRITICAL",
            Priority::Hack => "HACK",
            Priority::Script => "SCRIPT",
            Priority::Asset => "ASSET",
        }
    }

    /// Bit used for this priority in a severity mask.
    #[must_use]
    pub const fn mask(self) -> u32 {
        1 << self as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        Priority::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(ProtocolError::InvalidPriority(value))
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown priority '{s}'"))
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a message originated inside the producing process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageSource {
    /// Native code.
    Cpp = 0,
    /// The embedded scripting layer.
    Script = 1,
}

impl MessageSource {
    /// Number of sources; also the width of a source bitmask.
    pub const COUNT: usize = 2;

    /// Bit used for this source in a source mask.
    #[must_use]
    pub const fn mask(self) -> u32 {
        1 << self as u8
    }
}

impl TryFrom<u8> for MessageSource {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageSource::Cpp),
            1 => Ok(MessageSource::Script),
            other => Err(ProtocolError::InvalidSource(other)),
        }
    }
}

impl std::fmt::Display for MessageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MessageSource::Cpp => "C++",
            MessageSource::Script => "Script",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_bytes() {
        assert_eq!(Priority::try_from(5).unwrap(), Priority::Error);
        assert_eq!(Priority::try_from(10), Err(ProtocolError::InvalidPriority(10)));
        assert_eq!(Priority::Error.mask(), 0b10_0000);
    }

    #[test]
    fn priority_names_parse() {
        assert_eq!("warning".parse::<Priority>().unwrap(), Priority::Warning);
        assert!("loud".parse::<Priority>().is_err());
        assert_eq!(Priority::Critical.to_string(), "CRITICAL");
    }

    #[test]
    fn sources() {
        assert_eq!(MessageSource::try_from(1).unwrap(), MessageSource::Script);
        assert!(MessageSource::try_from(2).is_err());
        assert_eq!(MessageSource::Script.mask(), 2);
    }
}
