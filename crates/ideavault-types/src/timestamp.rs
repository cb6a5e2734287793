//! Record timestamps.
//!
//! The backend stamps every record with a UTC creation time rendered as
//! `YYYY-MM-DD HH:MM:SS.sssZ`. That text is parsed into a [`DateTime<Utc>`]
//! so ordering doesn't depend on string formatting.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wire format used by the backend.
const BACKEND_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
/// Same, with the ISO 8601 `T` separator.
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A UTC instant with millisecond precision on the wire.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Timestamp(DateTime<Utc>);

/// Error parsing a backend timestamp.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timestamp '{input}': {source}")]
pub struct TimestampError {
    pub input: String,
    pub source: chrono::ParseError,
}

impl Timestamp {
    /// Build from Unix milliseconds. Out-of-range values clamp to the epoch.
    pub fn from_millis(millis: u64) -> Self {
        i64::try_from(millis)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .map(Self)
            .unwrap_or_default()
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Unix milliseconds; instants before 1970 read as 0.
    pub fn as_millis(&self) -> u64 {
        u64::try_from(self.0.timestamp_millis()).unwrap_or(0)
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Parse `YYYY-MM-DD HH:MM:SS[.fff][Z]` (a `T` separator is accepted too).
    pub fn parse(input: &str) -> Result<Self, TimestampError> {
        let s = input.trim();
        let s = s.strip_suffix('Z').unwrap_or(s);
        NaiveDateTime::parse_from_str(s, BACKEND_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(s, ISO_FORMAT))
            .map(|naive| Self(naive.and_utc()))
            .map_err(|source| TimestampError { input: input.to_string(), source })
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3fZ"))
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Tests
// ============================================================================
