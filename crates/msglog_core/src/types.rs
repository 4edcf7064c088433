//! Timestamps, entry addresses and iteration direction.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time of a log entry, in seconds plus milliseconds since the
/// Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct LogTime {
    /// Whole seconds.
    pub secs: i64,
    /// Milliseconds, `0..1000`.
    pub msecs: u16,
}

impl LogTime {
    /// The earliest representable time; used for "from the beginning".
    pub const BEGIN: LogTime = LogTime { secs: 0, msecs: 0 };

    /// The latest representable time; used for "to the present".
    pub const END: LogTime = LogTime {
        secs: i64::MAX,
        msecs: 999,
    };

    /// Creates a time from seconds and milliseconds.
    pub fn new(secs: i64, msecs: u16) -> Self {
        Self {
            secs: secs + i64::from(msecs / 1000),
            msecs: msecs % 1000,
        }
    }

    /// The current time.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Creates a time from fractional seconds.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs <= 0.0 {
            return Self::BEGIN;
        }
        if secs >= i64::MAX as f64 {
            return Self::END;
        }
        let whole = secs.floor();
        let msecs = ((secs - whole) * 1000.0).round().min(999.0) as u16;
        Self::new(whole as i64, msecs)
    }

    /// Fractional seconds since the epoch.
    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + f64::from(self.msecs) / 1000.0
    }

    /// This time shifted by `delta` seconds, saturating at the extremes.
    #[must_use]
    pub fn offset_secs(&self, delta: f64) -> Self {
        if *self == Self::END && delta >= 0.0 {
            return Self::END;
        }
        Self::from_secs_f64(self.as_secs_f64() + delta)
    }

    /// Local time representation, if in chrono's range.
    pub fn to_local(&self) -> Option<DateTime<Local>> {
        Local
            .timestamp_opt(self.secs, u32::from(self.msecs) * 1_000_000)
            .single()
    }
}

impl From<SystemTime> for LogTime {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                secs: d.as_secs() as i64,
                msecs: d.subsec_millis() as u16,
            },
            Err(_) => Self::BEGIN,
        }
    }
}

impl fmt::Display for LogTime {
    /// Formats as e.g. `Mon 19 Oct 2026 10:02:11.042`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_local() {
            Some(local) => write!(f, "{}", local.format("%a %d %b %Y %H:%M:%S%.3f")),
            None => write!(f, "{}.{:03}", self.secs, self.msecs),
        }
    }
}

/// Location of one entry: the segment suffix and the index within it.
///
/// Suffixes sort in creation order, so addresses order chronologically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryAddress {
    /// Segment suffix.
    pub suffix: String,
    /// Index of the entry within the segment.
    pub index: u32,
}

impl EntryAddress {
    /// Creates an address.
    pub fn new(suffix: impl Into<String>, index: u32) -> Self {
        Self {
            suffix: suffix.into(),
            index,
        }
    }
}

impl fmt::Display for EntryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.suffix, self.index)
    }
}

impl FromStr for EntryAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let (suffix, index) = s
            .rsplit_once(':')
            .ok_or_else(|| CoreError::invalid_query(format!("expected SUFFIX:INDEX, got {s:?}")))?;
        let index = index
            .parse()
            .map_err(|_| CoreError::invalid_query(format!("bad entry index in {s:?}")))?;
        Ok(Self::new(suffix, index))
    }
}

/// Iteration direction of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Oldest first.
    #[default]
    Forwards,
    /// Newest first.
    Backwards,
}

impl Direction {
    /// The other direction.
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Direction::Forwards => Direction::Backwards,
            Direction::Backwards => Direction::Forwards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_ordering_and_conversion() {
        let a = LogTime::new(100, 5);
        let b = LogTime::new(100, 6);
        assert!(a < b);
        assert!(LogTime::BEGIN < a && b < LogTime::END);
        assert_eq!(LogTime::new(1, 1500), LogTime::new(2, 500));
        assert_eq!(LogTime::from_secs_f64(12.25), LogTime::new(12, 250));
        assert_eq!(LogTime::from_secs_f64(-3.0), LogTime::BEGIN);
        assert_eq!(LogTime::END.offset_secs(10.0), LogTime::END);
        assert_eq!(LogTime::new(10, 0).offset_secs(-2.5), LogTime::new(7, 500));
    }

    #[test]
    fn address_parse_and_order() {
        let a: EntryAddress = "20261019101500:7".parse().unwrap();
        assert_eq!(a, EntryAddress::new("20261019101500", 7));
        assert_eq!(a.to_string(), "20261019101500:7");
        assert!(EntryAddress::new("20261019101500", 9) < EntryAddress::new("20261019101501", 0));
        assert!("nocolon".parse::<EntryAddress>().is_err());
        assert!("x:y".parse::<EntryAddress>().is_err());
    }
}
