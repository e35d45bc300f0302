//! Outbound HTTP execution.
//!
//! Certificate verification is off unless
//! `ClientSettings::accept_invalid_certs` is cleared.

use axum::http::header::{CONNECTION, CONTENT_LENGTH, COOKIE, HOST, TRAILER, TRANSFER_ENCODING};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use std::time::Duration;
use tracing::debug;

use crate::descriptor::OutboundRequest;
use crate::error::{RelayError, Result};
use crate::translator::RawResponse;

/// Headers the client derives itself and that are never copied verbatim.
static FRAMING_HEADERS: [HeaderName; 5] = [HOST, CONTENT_LENGTH, TRANSFER_ENCODING, TRAILER, CONNECTION];

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    pub tls_handshake_timeout: Duration,
    pub response_header_timeout: Duration,
    /// Not enforced: the client never sends `Expect: 100-continue` on its own.
    pub expect_continue_timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(30),
            tls_handshake_timeout: Duration::from_secs(10),
            response_header_timeout: Duration::from_secs(10),
            expect_continue_timeout: Duration::from_secs(1),
            accept_invalid_certs: true,
        }
    }
}

impl ClientSettings {
    /// Upper bound on the wait for response headers: dial, TLS handshake and
    /// server think time together.
    pub fn header_deadline(&self) -> Duration {
        self.connect_timeout + self.tls_handshake_timeout + self.response_header_timeout
    }
}

/// Executes one outbound request at a time per call.
pub struct OutboundExecutor {
    settings: ClientSettings,
    direct: Client,
}

impl OutboundExecutor {
    pub fn new(settings: ClientSettings) -> Result<Self> {
        let direct = build_client(&settings, None)?;
        Ok(Self { settings, direct })
    }

    /// Send `request` and read the whole response body.
    pub async fn execute(&self, request: &OutboundRequest) -> Result<RawResponse> {
        let client = if request.proxy.is_empty() {
            self.direct.clone()
        } else {
            build_client(&self.settings, Some(&request.proxy))?
        };

        let outbound = build_request(&client, request)?;

        debug!(
            request_id = %request.id,
            method = %outbound.method(),
            url = %outbound.url(),
            proxied = !request.proxy.is_empty(),
            "Executing outbound request"
        );

        let response = tokio::time::timeout(self.settings.header_deadline(), client.execute(outbound))
            .await
            .map_err(|_| {
                RelayError::NetworkFailure(format!(
                    "No response headers from {} within {:?}",
                    request.url,
                    self.settings.header_deadline()
                ))
            })??;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(RawResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

fn build_client(settings: &ClientSettings, proxy: Option<&str>) -> Result<Client> {
    let builder = Client::builder()
        .connect_timeout(settings.connect_timeout)
        .tcp_keepalive(settings.keep_alive)
        .danger_accept_invalid_certs(settings.accept_invalid_certs);

    let builder = match proxy {
        Some(url) => {
            let proxy = reqwest::Proxy::all(url).map_err(|e| {
                RelayError::MalformedDescriptor(format!("Invalid proxy '{}': {}", url, e))
            })?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| RelayError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Build the wire request, rejecting anything that is not valid HTTP before
/// touching the network.
pub fn build_request(client: &Client, request: &OutboundRequest) -> Result<reqwest::Request> {
    let method = if request.method.is_empty() {
        Method::GET
    } else {
        Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            RelayError::MalformedDescriptor(format!("Invalid method '{}'", request.method))
        })?
    };

    let url = Url::parse(&request.url).map_err(|e| {
        RelayError::MalformedDescriptor(format!("Invalid url '{}': {}", request.url, e))
    })?;

    let mut headers = HeaderMap::with_capacity(request.headers.len() + 1);
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            RelayError::MalformedDescriptor(format!("Invalid header name '{}'", name))
        })?;
        if FRAMING_HEADERS.contains(&name) {
            continue;
        }
        let value = HeaderValue::from_str(value).map_err(|_| {
            RelayError::MalformedDescriptor(format!("Invalid value for header '{}'", name))
        })?;
        headers.insert(name, value);
    }

    if let Some(cookie) = cookie_header(headers.get(COOKIE), request) {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|_| RelayError::MalformedDescriptor("Invalid cookie value".to_string()))?;
        headers.insert(COOKIE, value);
    }

    let mut builder = client.request(method, url).headers(headers);
    if !request.body.is_empty() {
        builder = builder.body(request.body.clone());
    }

    Ok(builder.build()?)
}

/// Cookies are sent sorted by name and appended to any inherited header.
fn cookie_header(existing: Option<&HeaderValue>, request: &OutboundRequest) -> Option<String> {
    if request.cookies.is_empty() {
        return None;
    }

    let mut pairs: Vec<_> = request.cookies.iter().collect();
    pairs.sort();
    let joined = pairs
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ");

    match existing.and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty()) {
        Some(existing) => Some(format!("{}; {}", existing, joined)),
        None => Some(joined),
    }
}
