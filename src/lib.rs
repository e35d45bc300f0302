pub mod config;
pub mod config_validator;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod interval;
pub mod middleware;
pub mod rate_limiter;
pub mod relay;
pub mod server;
pub mod translator;
pub mod usage;

pub use config::Config;
pub use descriptor::{OutboundRequest, RequestDescriptor, ResponseDescriptor};
pub use error::{RelayError, Result};
pub use handlers::AppState;
pub use relay::Relay;
pub use server::create_app;
pub use usage::{UsageStore, UsageTracker};
