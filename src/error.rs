use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Malformed descriptor: {0}")]
    MalformedDescriptor(String),
    #[error("Network failure: {0}")]
    NetworkFailure(String),
    #[error("Usage store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("Permission denied")]
    MissingToken,
    #[error("Unauthorized")]
    InvalidToken,
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MalformedDescriptor(_) => StatusCode::BAD_REQUEST,
            RelayError::NetworkFailure(_) => StatusCode::BAD_GATEWAY,
            RelayError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            RelayError::MissingToken => StatusCode::FORBIDDEN,
            RelayError::InvalidToken => StatusCode::UNAUTHORIZED,
            RelayError::Configuration(_) | RelayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            RelayError::MalformedDescriptor(_) => "bad_request",
            RelayError::NetworkFailure(_) => "bad_gateway",
            RelayError::StoreUnavailable(_) => "service_unavailable",
            RelayError::RateLimitExceeded => "rate_limit_exceeded",
            RelayError::MissingToken => "forbidden",
            RelayError::InvalidToken => "unauthorized",
            RelayError::Configuration(_) => "configuration_error",
            RelayError::Internal(_) => "internal_error",
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            RelayError::MalformedDescriptor(err.to_string())
        } else {
            RelayError::NetworkFailure(err.to_string())
        }
    }
}

impl From<rusqlite::Error> for RelayError {
    fn from(err: rusqlite::Error) -> Self {
        RelayError::StoreUnavailable(err.to_string())
    }
}

impl From<redis::RedisError> for RelayError {
    fn from(err: redis::RedisError) -> Self {
        RelayError::StoreUnavailable(err.to_string())
    }
}

impl From<validator::ValidationErrors> for RelayError {
    fn from(err: validator::ValidationErrors) -> Self {
        RelayError::MalformedDescriptor(err.to_string())
    }
}

impl From<tokio::task::JoinError> for RelayError {
    fn from(err: tokio::task::JoinError) -> Self {
        RelayError::Internal(format!("Blocking task failed: {}", err))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_relay_error(err: &RelayError) -> Self {
        Self::new(err.kind(), &err.to_string(), err.status_code().as_u16())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(ErrorResponse::from_relay_error(&self))).into_response();

        if matches!(self, RelayError::RateLimitExceeded) {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static("60"));
        }

        response
    }
}
