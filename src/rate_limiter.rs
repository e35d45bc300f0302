use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::error::{RelayError, Result};

/// The throttle is expressed per minute; no client ever waits longer.
pub const THROTTLE_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of one throttle check.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after: Option<Duration>,
}

/// What one client address has left to spend.
#[derive(Debug, Clone)]
struct Allowance {
    tokens: f64,
    topped_up: Instant,
    last_seen: Instant,
}

impl Allowance {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(capacity),
            topped_up: now,
            last_seen: now,
        }
    }

    /// Credit the time since the last top-up, then spend one request if possible.
    fn spend(&mut self, now: Instant, capacity: u32, refill_rate: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.topped_up).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(f64::from(capacity));
        self.topped_up = now;
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one whole request is available again, capped at the window.
    fn wait(&self, refill_rate: f64) -> Duration {
        if refill_rate <= 0.0 {
            return THROTTLE_WINDOW;
        }
        let secs = (1.0 - self.tokens).max(0.0) / refill_rate;
        Duration::from_secs_f64(secs.min(THROTTLE_WINDOW.as_secs_f64()))
    }
}

/// In-memory per-client throttle. Every address may burst up to `capacity`
/// requests and regains `refill_rate` requests per second.
#[derive(Clone)]
pub struct RateLimiter {
    capacity: u32,
    refill_rate: f64,
    clients: Arc<RwLock<HashMap<String, Allowance>>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        RateLimiter {
            capacity,
            refill_rate,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// `requests` per minute, all of which may arrive as one burst.
    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests, f64::from(requests) / THROTTLE_WINDOW.as_secs_f64())
    }

    /// Spend one request from the allowance of `key`.
    pub fn check(&self, key: &str) -> Result<RateLimitDecision> {
        let now = Instant::now();
        let mut clients = self.clients.write()
            .map_err(|_| RelayError::Internal("Failed to acquire write lock on throttle".to_string()))?;

        let allowance = clients
            .entry(key.to_string())
            .or_insert_with(|| Allowance::full(self.capacity, now));

        let allowed = allowance.spend(now, self.capacity, self.refill_rate);

        Ok(RateLimitDecision {
            allowed,
            limit: self.capacity,
            remaining: allowance.tokens.floor() as u32,
            retry_after: (!allowed).then(|| allowance.wait(self.refill_rate)),
        })
    }

    /// Forget clients that have not been seen for `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> Result<usize> {
        let now = Instant::now();
        let mut clients = self.clients.write()
            .map_err(|_| RelayError::Internal("Failed to acquire write lock on throttle".to_string()))?;

        let before = clients.len();
        clients.retain(|_, allowance| now.saturating_duration_since(allowance.last_seen) < max_idle);

        Ok(before - clients.len())
    }
}
