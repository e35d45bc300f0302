//! Wire types exchanged with relay callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Caller-supplied description of the request to relay.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    /// Always generated here; a caller-supplied id is ignored.
    #[serde(skip_deserializing, default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    #[validate(url(message = "url must be an absolute URL"))]
    pub url: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, alias = "inherit_headers")]
    pub inherit_headers: bool,
    #[serde(default, alias = "inherit_cookies")]
    pub inherit_cookies: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(default)]
    #[validate(custom(function = "validate_proxy"))]
    pub proxy: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub log: bool,
    #[serde(default, alias = "log_body")]
    pub log_body: bool,
}

fn validate_proxy(proxy: &str) -> Result<(), ValidationError> {
    if proxy.is_empty() || reqwest::Url::parse(proxy).is_ok() {
        return Ok(());
    }

    let mut error = ValidationError::new("proxy");
    error.message = Some("proxy must be empty or an absolute URL".into());
    Err(error)
}

/// A fully merged request, owned by the executor for one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub id: Uuid,
    pub method: String,
    pub url: String,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub proxy: String,
}

/// What the relay hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDescriptor {
    pub id: Uuid,
    pub request_id: Uuid,
    pub method: String,
    pub url: String,
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
    pub headers: HashMap<String, String>,
    pub body: String,
}
