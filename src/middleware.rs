use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{header::RETRY_AFTER, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::handlers::AppState;
use crate::rate_limiter::THROTTLE_WINDOW;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Logging middleware for request/response tracking
pub async fn logging_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = client_ip(&request, state.behind_proxy);

    info!(
        target: "courier::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "courier::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}

/// Tag every response with a fresh request id.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Count relay traffic in the usage store without waiting for the write.
pub async fn usage_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(tracker) = &state.usage {
        if counts_as_usage(&request) {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                if let Err(e) = tracker.record_hit().await {
                    warn!(
                        target: "courier::middleware",
                        error = %e,
                        "Dropped usage hit"
                    );
                }
            });
        }
    }

    next.run(request).await
}

fn counts_as_usage(request: &Request) -> bool {
    let path = request.uri().path();
    request.method() != Method::OPTIONS && !path.contains("stats") && !path.contains("health")
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Require `?token=` to match the configured shared secret. The query is
/// only inspected when a token is configured.
pub async fn token_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, RelayError> {
    let Some(expected) = state.token.as_deref() else {
        return Ok(next.run(request).await);
    };
    if is_health_probe(&request) {
        return Ok(next.run(request).await);
    }

    // An unparseable query (e.g. a repeated `token`) carries no usable token.
    let supplied = Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(query)| query.token);

    match supplied.as_deref() {
        None | Some("") => Err(RelayError::MissingToken),
        Some(token) if token != expected => Err(RelayError::InvalidToken),
        Some(_) => Ok(next.run(request).await),
    }
}

/// Per-client-IP throttle.
pub async fn throttle_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, RelayError> {
    let Some(limiter) = &state.limiter else {
        return Ok(next.run(request).await);
    };
    if is_health_probe(&request) {
        return Ok(next.run(request).await);
    }

    let client_ip = client_ip(&request, state.behind_proxy);
    let decision = limiter.check(&client_ip)?;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        warn!(
            target: "courier::middleware",
            client_ip = %client_ip,
            "Rate limit exceeded"
        );
        let mut denied = RelayError::RateLimitExceeded.into_response();
        if let Some(retry_after) = decision.retry_after {
            denied
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
        }
        denied
    };

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));

    Ok(response)
}

/// Whole seconds to wait, rounded up and never beyond the throttle window.
fn retry_after_secs(wait: Duration) -> u64 {
    let wait = wait.min(THROTTLE_WINDOW);
    wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
}

fn is_health_probe(request: &Request) -> bool {
    request.uri().path() == "/health"
}

/// Peer address of the caller; forwarding headers are honoured only when
/// the service runs behind a trusted proxy.
pub fn client_ip(request: &Request, behind_proxy: bool) -> String {
    if behind_proxy {
        if let Some(forwarded) = request.headers().get("x-forwarded-for") {
            if let Ok(forwarded_str) = forwarded.to_str() {
                if let Some(first_ip) = forwarded_str.split(',').next() {
                    let first_ip = first_ip.trim();
                    if !first_ip.is_empty() {
                        return first_ip.to_string();
                    }
                }
            }
        }

        if let Some(real_ip) = request.headers().get("x-real-ip") {
            if let Ok(ip_str) = real_ip.to_str() {
                return ip_str.to_string();
            }
        }
    }

    // Fallback to connection info
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}
