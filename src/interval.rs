//! Interval bucketing for usage counters.
//!
//! Bucket keys are UTC timestamps in a fixed-width format, so comparing two
//! keys as strings orders them chronologically. Stores rely on this for their
//! range scans.

use chrono::{DateTime, TimeDelta, Timelike, Utc};

use crate::error::{RelayError, Result};

/// `YYYY-MM-DDTHH:MM:SSZ`
pub const BUCKET_KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Bucket width in minutes, between 1 and 60.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Granularity(u32);

impl Granularity {
    pub fn minutes(minutes: u32) -> Result<Self> {
        if minutes == 0 || minutes > 60 {
            return Err(RelayError::Configuration(format!(
                "Granularity must be between 1 and 60 minutes, got {}",
                minutes
            )));
        }
        Ok(Self(minutes))
    }

    pub fn as_minutes(&self) -> u32 {
        self.0
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Self(5)
    }
}

/// Inclusive range of bucket keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub min: String,
    pub max: String,
}

/// Start of the bucket containing `timestamp`.
pub fn bucket_start(timestamp: DateTime<Utc>, granularity: Granularity) -> DateTime<Utc> {
    let offset_secs = i64::from(timestamp.minute() % granularity.0) * 60 + i64::from(timestamp.second());
    timestamp
        - TimeDelta::seconds(offset_secs)
        - TimeDelta::nanoseconds(i64::from(timestamp.nanosecond()))
}

pub fn format_key(timestamp: DateTime<Utc>) -> String {
    timestamp.format(BUCKET_KEY_FORMAT).to_string()
}

pub fn bucket_key(timestamp: DateTime<Utc>, granularity: Granularity) -> String {
    format_key(bucket_start(timestamp, granularity))
}

/// Keys covering `lookback` up to and including the bucket of `now`.
pub fn range_keys(now: DateTime<Utc>, granularity: Granularity, lookback: TimeDelta) -> KeyRange {
    KeyRange {
        min: bucket_key(now - lookback, granularity),
        max: bucket_key(now, granularity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    fn five() -> Granularity {
        Granularity::minutes(5).unwrap()
    }

    #[test]
    fn test_bucket_start_truncates_to_granularity() {
        assert_eq!(bucket_start(at(10, 7, 0), five()), at(10, 5, 0));
        assert_eq!(bucket_start(at(10, 9, 59), five()), at(10, 5, 0));
        assert_eq!(bucket_start(at(10, 10, 0), five()), at(10, 10, 0));
        assert_eq!(bucket_start(at(10, 0, 1), five()), at(10, 0, 0));
    }

    #[test]
    fn test_bucket_start_zeroes_subseconds() {
        let ts = at(10, 7, 30) + TimeDelta::milliseconds(250);
        let start = bucket_start(ts, five());
        assert_eq!(start, at(10, 5, 0));
        assert_eq!(start.nanosecond(), 0);
    }

    #[test]
    fn test_hourly_granularity() {
        let hourly = Granularity::minutes(60).unwrap();
        assert_eq!(bucket_start(at(23, 59, 59), hourly), at(23, 0, 0));
    }

    #[test]
    fn test_granularity_bounds() {
        assert!(Granularity::minutes(0).is_err());
        assert!(Granularity::minutes(61).is_err());
        assert_eq!(Granularity::minutes(1).unwrap().as_minutes(), 1);
        assert_eq!(Granularity::default().as_minutes(), 5);
    }

    #[test]
    fn test_key_format() {
        assert_eq!(bucket_key(at(10, 7, 12), five()), "2024-01-01T10:05:00Z");
    }

    #[test]
    fn test_keys_sort_chronologically() {
        let earlier = format_key(Utc.with_ymd_and_hms(2023, 12, 31, 23, 55, 0).unwrap());
        let later = format_key(at(0, 0, 0));
        let much_later = format_key(Utc.with_ymd_and_hms(2024, 10, 1, 9, 0, 0).unwrap());
        assert!(earlier < later);
        assert!(later < much_later);
        assert_eq!(earlier.len(), later.len());
    }

    #[test]
    fn test_range_keys() {
        let range = range_keys(at(10, 17, 42), five(), TimeDelta::hours(1));
        assert_eq!(range.min, "2024-01-01T09:15:00Z");
        assert_eq!(range.max, "2024-01-01T10:15:00Z");
    }
}
