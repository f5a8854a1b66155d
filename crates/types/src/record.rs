//! Row payload envelope and timestamps.
//!
//! Every user row is persisted as a [`TableData`] envelope carrying the
//! creation/update timestamps, the collection schema version the row was
//! written under, and the raw document bytes.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Nanosecond-precision wall-clock timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    /// Builds a timestamp from unix nanoseconds.
    pub const fn from_unix_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Unix nanoseconds since the epoch.
    pub const fn unix_nanos(self) -> i64 {
        self.0
    }

    /// RFC 3339 rendering with nanosecond precision, used for schema
    /// defaults tagged with a creation/update time.
    pub fn to_rfc3339(self) -> String {
        self.to_datetime().to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn to_datetime(self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.0)
    }
}

/// The persisted envelope of a user row.
///
/// `created_at` is immutable after insert; `updated_at` is set on every
/// mutation; `version` records the collection schema version at write
/// time so reads can re-shape rows written under older schemas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableData {
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
    pub version: i32,
    pub raw: Vec<u8>,
}

impl TableData {
    /// New envelope for a freshly inserted document.
    pub fn new(created_at: Timestamp, raw: Vec<u8>) -> Self {
        Self { created_at, updated_at: None, version: 0, raw }
    }

    /// New envelope for a mutated document, preserving the original
    /// creation time.
    pub fn updated(created_at: Timestamp, updated_at: Timestamp, raw: Vec<u8>) -> Self {
        Self { created_at, updated_at: Some(updated_at), version: 0, raw }
    }

    /// Records the collection schema version the row is written under.
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_rfc3339() {
        let ts = Timestamp::from_unix_nanos(1_600_000_000_000_000_500);
        assert_eq!(ts.to_rfc3339(), "2020-09-13T12:26:40.000000500Z");
    }

    #[test]
    fn test_timestamp_ordering() {
        let a = Timestamp::now();
        let b = Timestamp::from_unix_nanos(a.unix_nanos() + 1);
        assert!(b > a);
    }

    #[test]
    fn test_table_data_updated_keeps_created_at() {
        let created = Timestamp::from_unix_nanos(1);
        let updated = Timestamp::from_unix_nanos(2);
        let data = TableData::updated(created, updated, b"{}".to_vec()).with_version(3);
        assert_eq!(data.created_at, created);
        assert_eq!(data.updated_at, Some(updated));
        assert_eq!(data.version, 3);
    }
}
