use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use super::UsageStore;
use crate::error::{RelayError, Result};

/// Usage counters in a local SQLite file.
///
/// One connection behind a mutex gives a single writer; each increment also
/// runs in its own transaction.
pub struct SqliteUsageStore {
    conn: Mutex<Connection>,
}

impl SqliteUsageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "Usage store ready");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS usage (
              bucket TEXT PRIMARY KEY,
              count INTEGER NOT NULL
            ) WITHOUT ROWID;
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RelayError::StoreUnavailable("Usage store lock poisoned".to_string()))
    }
}

impl UsageStore for SqliteUsageStore {
    fn increment(&self, key: &str) -> Result<u64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let count: i64 = tx.query_row(
            r#"
            INSERT INTO usage (bucket, count) VALUES (?1, 1)
            ON CONFLICT(bucket) DO UPDATE SET count = count + 1
            RETURNING count
            "#,
            params![key],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(count as u64)
    }

    fn sum_range(&self, min_key: &str, max_key: &str) -> Result<u64> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(count), 0) FROM usage WHERE bucket >= ?1 AND bucket <= ?2",
            params![min_key, max_key],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    fn ping(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_increment_creates_bucket_lazily() {
        let store = SqliteUsageStore::open_in_memory().unwrap();
        assert_eq!(store.sum_range("2024-01-01T00:00:00Z", "2024-12-31T23:59:59Z").unwrap(), 0);
        assert_eq!(store.increment("2024-01-01T10:05:00Z").unwrap(), 1);
        assert_eq!(store.increment("2024-01-01T10:05:00Z").unwrap(), 2);
    }

    #[test]
    fn test_sum_range_is_inclusive_and_skips_missing() {
        let store = SqliteUsageStore::open_in_memory().unwrap();
        for _ in 0..3 {
            store.increment("2024-01-01T10:05:00Z").unwrap();
        }
        for _ in 0..2 {
            store.increment("2024-01-01T10:10:00Z").unwrap();
        }
        store.increment("2024-01-01T10:20:00Z").unwrap();

        let total = store
            .sum_range("2024-01-01T10:05:00Z", "2024-01-01T10:15:00Z")
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(
            store.sum_range("2024-01-01T10:05:00Z", "2024-01-01T10:15:00Z").unwrap(),
            total
        );
    }

    #[test]
    fn test_counts_do_not_wrap_at_a_byte() {
        let store = SqliteUsageStore::open_in_memory().unwrap();
        for _ in 0..300 {
            store.increment("2024-01-01T10:05:00Z").unwrap();
        }
        assert_eq!(
            store.sum_range("2024-01-01T10:05:00Z", "2024-01-01T10:05:00Z").unwrap(),
            300
        );
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(SqliteUsageStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        store.increment("2024-01-01T10:05:00Z").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            store.sum_range("2024-01-01T10:05:00Z", "2024-01-01T10:05:00Z").unwrap(),
            400
        );
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let path = std::env::temp_dir().join(format!("courier-usage-{}.db", uuid::Uuid::new_v4()));
        {
            let store = SqliteUsageStore::open(&path).unwrap();
            store.increment("2024-01-01T10:05:00Z").unwrap();
            store.ping().unwrap();
        }
        let reopened = SqliteUsageStore::open(&path).unwrap();
        assert_eq!(reopened.increment("2024-01-01T10:05:00Z").unwrap(), 2);
        drop(reopened);
        let _ = std::fs::remove_file(&path);
    }
}
