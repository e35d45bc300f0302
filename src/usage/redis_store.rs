use redis::{Client, Connection};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::UsageStore;
use crate::error::{RelayError, Result};

const USAGE_HASH: &str = "courier:usage";
/// Every bucket key at score 0, so `ZRANGEBYLEX` walks them in key order.
const BUCKET_INDEX: &str = "courier:usage:buckets";

/// Whether a command may be replayed on a fresh connection after an I/O
/// error. Increments may already have reached the server and must not be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    Safe,
    Unsafe,
}

/// Usage counters in a Redis hash, one field per bucket, plus a lexically
/// ordered index of bucket keys for range scans.
///
/// `HINCRBY` is atomic on the server, so increments from several relay
/// instances sharing one Redis never lose updates.
pub struct RedisUsageStore {
    client: Client,
    connection: Mutex<Option<Connection>>,
}

impl RedisUsageStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            RelayError::Configuration(format!("Failed to create Redis client: {}", e))
        })?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    /// Run `f` on a live connection. A dropped cached connection is replaced;
    /// the command is re-sent on the new one only when `replay` allows it.
    fn with_connection<T>(
        &self,
        replay: Replay,
        f: impl Fn(&mut Connection) -> redis::RedisResult<T>,
    ) -> Result<T> {
        let mut guard = self.lock()?;

        if let Some(conn) = guard.as_mut() {
            match f(conn) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if connection_lost(&e) {
                        *guard = None;
                        warn!(error = %e, "Redis connection lost");
                    }
                    if !should_replay(replay, &e) {
                        return Err(e.into());
                    }
                }
            }
        }

        let mut conn = self.client.get_connection()?;
        let value = f(&mut conn)?;
        *guard = Some(conn);
        Ok(value)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.connection.lock().map_err(|_| {
            RelayError::StoreUnavailable("Failed to acquire connection lock".to_string())
        })
    }
}

impl UsageStore for RedisUsageStore {
    fn increment(&self, key: &str) -> Result<u64> {
        let (count,): (u64,) = self.with_connection(Replay::Unsafe, |conn| {
            redis::pipe()
                .atomic()
                .cmd("HINCRBY")
                .arg(USAGE_HASH)
                .arg(key)
                .arg(1)
                .cmd("ZADD")
                .arg(BUCKET_INDEX)
                .arg(0)
                .arg(key)
                .ignore()
                .query(conn)
        })?;
        Ok(count)
    }

    fn sum_range(&self, min_key: &str, max_key: &str) -> Result<u64> {
        let (min, max) = (inclusive_bound(min_key), inclusive_bound(max_key));
        let counts: Vec<Option<u64>> = self.with_connection(Replay::Safe, |conn| {
            let keys: Vec<String> = redis::cmd("ZRANGEBYLEX")
                .arg(BUCKET_INDEX)
                .arg(&min)
                .arg(&max)
                .query(conn)?;
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            redis::cmd("HMGET").arg(USAGE_HASH).arg(&keys).query(conn)
        })?;
        Ok(counts.into_iter().flatten().sum())
    }

    fn ping(&self) -> Result<()> {
        let reply: String = self.with_connection(Replay::Safe, |conn| redis::cmd("PING").query(conn))?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(RelayError::StoreUnavailable(format!("Unexpected PING reply: {}", reply)))
        }
    }
}

fn connection_lost(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped()
}

fn should_replay(replay: Replay, err: &redis::RedisError) -> bool {
    replay == Replay::Safe && connection_lost(err)
}

/// `ZRANGEBYLEX` bound that includes `key` itself.
fn inclusive_bound(key: &str) -> String {
    format!("[{}", key)
}
