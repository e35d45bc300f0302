use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::config_validator::ConfigValidator;
use crate::descriptor::{RequestDescriptor, ResponseDescriptor};
use crate::error::{RelayError, Result};
use crate::rate_limiter::RateLimiter;
use crate::relay::Relay;
use crate::usage::{RedisUsageStore, SqliteUsageStore, StatsWindow, UsageStore, UsageTracker};

/// Everything the handlers and middleware share. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub usage: Option<UsageTracker>,
    pub limiter: Option<RateLimiter>,
    pub token: Option<Arc<str>>,
    pub behind_proxy: bool,
}

impl AppState {
    /// Relay only: no usage tracking, throttling or token check.
    pub fn new(relay: Relay) -> Self {
        Self {
            relay: Arc::new(relay),
            usage: None,
            limiter: None,
            token: None,
            behind_proxy: false,
        }
    }

    pub fn with_usage(mut self, tracker: UsageTracker) -> Self {
        self.usage = Some(tracker);
        self
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(Arc::from(token));
        self
    }

    pub fn behind_proxy(mut self, behind_proxy: bool) -> Self {
        self.behind_proxy = behind_proxy;
        self
    }

    /// Open the usage store and build the relay as configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        ConfigValidator::validate(config)?;

        let mut state = AppState::new(Relay::new(config.client_settings())?)
            .behind_proxy(config.behind_proxy);

        if config.stats {
            let granularity = ConfigValidator::validate_granularity(config.stats_granularity)?;
            let store: Arc<dyn UsageStore> = match &config.redis_url {
                Some(url) => Arc::new(RedisUsageStore::new(url)?),
                None => Arc::new(SqliteUsageStore::open(&config.stats_db)?),
            };
            if let Err(e) = store.ping() {
                warn!(error = %e, "Usage store unreachable at startup");
            }
            state = state.with_usage(UsageTracker::new(store, granularity));
        }
        if config.throttle > 0 {
            state = state.with_limiter(RateLimiter::per_minute(config.throttle));
        }
        if !config.token.is_empty() {
            state = state.with_token(&config.token);
        }

        Ok(state)
    }
}

/// Execute the described request and report the upstream response.
pub async fn relay_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResponseDescriptor>> {
    let descriptor: RequestDescriptor = serde_json::from_slice(&body)
        .map_err(|e| RelayError::MalformedDescriptor(format!("Invalid request body: {}", e)))?;

    let response = state.relay.translate_and_execute(descriptor, &headers).await?;
    Ok(Json(response))
}

/// Relay counts over the default lookback windows.
pub async fn stats(State(state): State<AppState>) -> Result<Json<BTreeMap<String, u64>>> {
    let tracker = state
        .usage
        .as_ref()
        .ok_or_else(|| RelayError::StoreUnavailable("Usage tracking is disabled".to_string()))?;

    let stats = tracker.query_stats(&StatsWindow::defaults()).await?;
    Ok(Json(stats))
}

/// Liveness probe.
pub async fn health_check() -> StatusCode {
    StatusCode::OK
}
