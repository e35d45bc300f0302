use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::handlers::{health_check, relay_request, stats, AppState};
use crate::middleware::{
    logging_middleware, request_id_middleware, throttle_middleware, token_auth_middleware,
    usage_middleware,
};
use axum::http::{header, HeaderName, Method};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct Server {
    app: Router,
    state: AppState,
    bind_address: String,
    cleanup_interval: Duration,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let state = AppState::from_config(&config)?;
        let app = create_app(state.clone());

        Ok(Self {
            app,
            state,
            bind_address: config.bind_address(),
            cleanup_interval: config.cleanup_interval(),
        })
    }

    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_address)
            .await
            .map_err(|e| RelayError::Configuration(format!("Failed to bind {}: {}", self.bind_address, e)))?;

        tracing::info!("Courier listening on {}", self.bind_address);
        tracing::info!("Health check available at /health");
        if self.state.usage.is_some() {
            tracing::info!("Usage statistics available at /stats");
        }

        if let Some(limiter) = self.state.limiter.clone() {
            let interval = self.cleanup_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match limiter.evict_idle(interval) {
                        Ok(0) => {}
                        Ok(removed) => tracing::debug!(removed, "Evicted idle throttle clients"),
                        Err(e) => tracing::warn!(error = %e, "Throttle cleanup failed"),
                    }
                }
            });
        }

        // Run server with graceful shutdown
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RelayError::Internal(format!("Server error: {}", e)))?;

        tracing::info!("Courier stopped");
        Ok(())
    }
}

/// Routes plus the middleware stack, outermost layer first.
pub fn create_app(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", post(relay_request))
        .route("/health", get(health_check));
    if state.usage.is_some() {
        router = router.route("/stats", get(stats));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer())
                .layer(middleware::from_fn(request_id_middleware))
                .layer(middleware::from_fn_with_state(state.clone(), logging_middleware))
                .layer(middleware::from_fn_with_state(state.clone(), usage_middleware))
                .layer(middleware::from_fn_with_state(state.clone(), token_auth_middleware))
                .layer(middleware::from_fn_with_state(state.clone(), throttle_middleware)),
        )
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_headers([
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::ACCEPT_ENCODING,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
            header::CACHE_CONTROL,
            HeaderName::from_static("x-requested-with"),
        ])
        .allow_methods([
            Method::POST,
            Method::OPTIONS,
            Method::GET,
            Method::PUT,
            Method::DELETE,
        ])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
