//! Interval-bucketed usage counters.
//!
//! Stores only know about opaque bucket keys. The [`UsageTracker`] ties a
//! store to a granularity and turns "now" into keys.

pub mod redis_store;
pub mod sqlite_store;

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::interval::{bucket_key, range_keys, Granularity};

pub use redis_store::RedisUsageStore;
pub use sqlite_store::SqliteUsageStore;

/// Durable ordered key→count map.
///
/// Implementations must serialise increments of the same key so that no
/// update is lost.
pub trait UsageStore: Send + Sync {
    /// Add one to the bucket at `key` and return the new count.
    fn increment(&self, key: &str) -> Result<u64>;

    /// Sum every bucket with `min_key <= key <= max_key`.
    fn sum_range(&self, min_key: &str, max_key: &str) -> Result<u64>;

    /// Cheap reachability check.
    fn ping(&self) -> Result<()>;
}

/// Named lookback window reported by the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsWindow {
    pub name: &'static str,
    pub lookback: TimeDelta,
}

impl StatsWindow {
    pub const fn new(name: &'static str, lookback: TimeDelta) -> Self {
        Self { name, lookback }
    }

    pub fn defaults() -> Vec<StatsWindow> {
        vec![
            StatsWindow::new("last_hour", TimeDelta::hours(1)),
            StatsWindow::new("last_24h", TimeDelta::hours(24)),
            StatsWindow::new("last_7d", TimeDelta::days(7)),
            StatsWindow::new("last_30d", TimeDelta::days(30)),
        ]
    }
}

#[derive(Clone)]
pub struct UsageTracker {
    store: Arc<dyn UsageStore>,
    granularity: Granularity,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn UsageStore>, granularity: Granularity) -> Self {
        Self { store, granularity }
    }

    /// Count one relay call in the current bucket.
    pub async fn record_hit(&self) -> Result<u64> {
        self.record_hit_at(Utc::now()).await
    }

    pub async fn record_hit_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let key = bucket_key(now, self.granularity);
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.increment(&key)).await?
    }

    /// Sum each window ending at the current bucket.
    pub async fn query_stats(&self, windows: &[StatsWindow]) -> Result<BTreeMap<String, u64>> {
        self.query_stats_at(Utc::now(), windows).await
    }

    pub async fn query_stats_at(
        &self,
        now: DateTime<Utc>,
        windows: &[StatsWindow],
    ) -> Result<BTreeMap<String, u64>> {
        let ranges: Vec<_> = windows
            .iter()
            .map(|w| (w.name.to_string(), range_keys(now, self.granularity, w.lookback)))
            .collect();
        let store = self.store.clone();

        tokio::task::spawn_blocking(move || -> Result<BTreeMap<String, u64>> {
            let mut sums = BTreeMap::new();
            for (name, range) in ranges {
                sums.insert(name, store.sum_range(&range.min, &range.max)?);
            }
            Ok(sums)
        })
        .await?
    }
}
