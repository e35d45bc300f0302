use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::executor::ClientSettings;

#[derive(Debug, Clone, Parser)]
#[command(name = "courier", version, about = "Relay JSON-described HTTP requests")]
pub struct Config {
    /// Host the server should run on
    #[arg(long, env = "COURIER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port the server should run on
    #[arg(long, env = "COURIER_PORT", default_value_t = 9000)]
    pub port: u16,

    /// Requests per minute allowed from one client IP (0 disables throttling)
    #[arg(long, env = "COURIER_THROTTLE", default_value_t = 60)]
    pub throttle: u32,

    /// Trust X-Forwarded-For / X-Real-IP for the client address
    #[arg(long, env = "COURIER_BEHIND_PROXY", default_value_t = false, action = ArgAction::Set)]
    pub behind_proxy: bool,

    /// Shared token required as `?token=` on every request (empty disables)
    #[arg(long, env = "COURIER_TOKEN", default_value = "", hide_env_values = true)]
    pub token: String,

    /// Whether to track usage statistics
    #[arg(long, env = "COURIER_STATS", default_value_t = true, action = ArgAction::Set)]
    pub stats: bool,

    /// SQLite file holding the usage counters
    #[arg(long, env = "COURIER_STATS_DB", default_value = "stats.db")]
    pub stats_db: PathBuf,

    /// Keep usage counters in Redis instead of the local file
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Width of one usage bucket in minutes
    #[arg(long, env = "COURIER_STATS_GRANULARITY", default_value_t = 5)]
    pub stats_granularity: u32,

    /// Skip TLS certificate verification on outbound requests
    #[arg(long, env = "COURIER_INSECURE_TLS", default_value_t = true, action = ArgAction::Set)]
    pub insecure_tls: bool,

    /// Seconds between sweeps of idle throttle buckets
    #[arg(long, env = "COURIER_CLEANUP_INTERVAL", default_value_t = 300)]
    pub cleanup_interval_secs: u64,

    /// Log level for the courier target
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            accept_invalid_certs: self.insecure_tls,
            ..ClientSettings::default()
        }
    }
}
