//! Core types for tagdb

use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp in seconds since Unix epoch
pub type Timestamp = i64;

/// Sample value; units are up to the producer
pub type Value = i64;

/// A single `(timestamp, value)` pair
pub type Sample = (Timestamp, Value);

/// Storage resolution of a block chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Resolution {
    /// Raw samples
    Full = 0,
    /// One retained sample per 60s bucket
    Minute = 1,
    /// One retained sample per hour bucket
    Hour = 2,
    /// One retained sample per day bucket
    Day = 3,
}

impl Resolution {
    /// Every resolution, raw first
    pub const ALL: [Resolution; 4] = [
        Resolution::Full,
        Resolution::Minute,
        Resolution::Hour,
        Resolution::Day,
    ];

    /// Resolutions fed from FULL writes
    pub const DOWNSAMPLES: [Resolution; 3] =
        [Resolution::Minute, Resolution::Hour, Resolution::Day];

    /// Bucket width in seconds, `None` for raw data
    pub fn period(&self) -> Option<i64> {
        match self {
            Resolution::Full => None,
            Resolution::Minute => Some(60),
            Resolution::Hour => Some(60 * 60),
            Resolution::Day => Some(60 * 60 * 24),
        }
    }

    /// Parse from the names used on the query API
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "full" => Some(Resolution::Full),
            "minute" => Some(Resolution::Minute),
            "hour" => Some(Resolution::Hour),
            "day" => Some(Resolution::Day),
            _ => None,
        }
    }

    /// Lower-case name
    pub fn name(&self) -> &'static str {
        match self {
            Resolution::Full => "full",
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::Day => "day",
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::Full
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Resolution {
    type Error = crate::TagDbError;

    fn try_from(value: u8) -> crate::Result<Self> {
        match value {
            0 => Ok(Resolution::Full),
            1 => Ok(Resolution::Minute),
            2 => Ok(Resolution::Hour),
            3 => Ok(Resolution::Day),
            _ => Err(crate::TagDbError::InvalidFormat(format!(
                "Invalid resolution: {}",
                value
            ))),
        }
    }
}

/// Time range for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Everything from the epoch onwards
    pub fn all() -> Self {
        Self::new(0, Timestamp::MAX)
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_names() {
        for resolution in Resolution::ALL {
            assert_eq!(Resolution::from_name(resolution.name()), Some(resolution));
            assert_eq!(Resolution::try_from(resolution as u8).unwrap(), resolution);
        }
        assert_eq!(Resolution::from_name("HOUR"), Some(Resolution::Hour));
        assert_eq!(Resolution::from_name("week"), None);
        assert!(Resolution::try_from(9).is_err());
    }

    #[test]
    fn test_resolution_periods() {
        assert_eq!(Resolution::Full.period(), None);
        assert_eq!(Resolution::Minute.period(), Some(60));
        assert_eq!(Resolution::Hour.period(), Some(3600));
        assert_eq!(Resolution::Day.period(), Some(86400));
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::new(100, 200);
        assert!(range.contains(100));
        assert!(range.contains(200));
        assert!(!range.contains(201));
        assert!(TimeRange::all().contains(0));
        assert!(!TimeRange::all().contains(-1));
    }
}
