//! Conversion between relay descriptors and HTTP requests/responses.
//!
//! Multi-valued headers are flattened by concatenating their values in
//! arrival order with no separator. Callers observe this on both the
//! inherited request headers and the returned response headers, so the rule
//! must stay identical in both directions.

use axum::http::{header::COOKIE, HeaderMap, StatusCode};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use crate::descriptor::{OutboundRequest, RequestDescriptor, ResponseDescriptor};

/// Overlay `overrides` on top of `base`. Keys from `overrides` always win.
pub fn merge(
    mut base: HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    for (key, value) in overrides {
        base.insert(key.clone(), value.clone());
    }
    base
}

/// Collapse a header multimap into one string per header name.
pub fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut flattened = HashMap::with_capacity(headers.keys_len());
    for name in headers.keys() {
        let joined: String = headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()))
            .collect();
        flattened.insert(name.as_str().to_string(), joined);
    }
    flattened
}

/// Parse every `Cookie` header into a name/value map; later duplicates win.
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            let pair = pair.trim();
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            cookies.insert(name.to_string(), unquote(value.trim()).to_string());
        }
    }
    cookies
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Build the outbound request for `descriptor`, pulling headers and cookies
/// from the inbound request when the descriptor asks for them.
pub fn to_outbound(descriptor: RequestDescriptor, inbound: &HeaderMap) -> OutboundRequest {
    let inherited_headers = if descriptor.inherit_headers {
        flatten_headers(inbound)
    } else {
        HashMap::new()
    };
    let inherited_cookies = if descriptor.inherit_cookies {
        parse_cookies(inbound)
    } else {
        HashMap::new()
    };

    OutboundRequest {
        id: descriptor.id,
        headers: merge(inherited_headers, &lowercase_names(descriptor.headers)),
        cookies: merge(inherited_cookies, &descriptor.cookies),
        method: descriptor.method,
        url: descriptor.url,
        body: descriptor.body,
        proxy: descriptor.proxy,
    }
}

/// Header names are case-insensitive and inherited ones arrive lowercase, so
/// caller-supplied names are folded the same way before they override.
fn lowercase_names(headers: HashMap<String, String>) -> HashMap<String, String> {
    headers
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect()
}

/// Raw outcome of one outbound execution.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Turn a raw response into the descriptor returned to the caller.
pub fn to_response_descriptor(request: &OutboundRequest, raw: RawResponse) -> ResponseDescriptor {
    ResponseDescriptor {
        id: Uuid::new_v4(),
        request_id: request.id,
        method: request.method.clone(),
        url: request.url.clone(),
        status_code: raw.status.as_u16(),
        timestamp: Utc::now(),
        headers: flatten_headers(&raw.headers),
        body: String::from_utf8_lossy(&raw.body).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn descriptor(inherit_headers: bool, inherit_cookies: bool) -> RequestDescriptor {
        serde_json::from_value(serde_json::json!({
            "method": "POST",
            "url": "https://example.test/api",
            "body": "{\"k\":1}",
            "inheritHeaders": inherit_headers,
            "inheritCookies": inherit_cookies,
            "headers": {"x-explicit": "1", "x-shared": "descriptor"},
            "cookies": {"session": "override"},
            "proxy": "http://proxy.test:3128"
        }))
        .unwrap()
    }

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.append("x-shared", HeaderValue::from_static("inbound"));
        headers.append("x-multi", HeaderValue::from_static("a"));
        headers.append("x-multi", HeaderValue::from_static("b"));
        headers.append(COOKIE, HeaderValue::from_static("session=abc; theme=dark"));
        headers.append(COOKIE, HeaderValue::from_static("lang=en; theme=\"light\""));
        headers
    }

    #[test]
    fn test_merge_override_wins() {
        let base = map(&[("a", "1"), ("b", "2")]);
        let overrides = map(&[("b", "3"), ("c", "4")]);

        let merged = merge(base, &overrides);
        assert_eq!(merged, map(&[("a", "1"), ("b", "3"), ("c", "4")]));
    }

    #[test]
    fn test_merge_size_is_union_of_keys() {
        let base = map(&[("x", "1"), ("y", "2"), ("z", "3")]);
        let overrides = map(&[("y", "9"), ("w", "0")]);

        let merged = merge(base.clone(), &overrides);
        assert_eq!(merged.len(), 4);
        for (key, value) in &overrides {
            assert_eq!(merged.get(key), Some(value));
        }
        for (key, value) in base.iter().filter(|(k, _)| !overrides.contains_key(*k)) {
            assert_eq!(merged.get(key), Some(value));
        }
    }

    #[test]
    fn test_merge_with_empty_sides() {
        let only = map(&[("k", "v")]);
        assert_eq!(merge(HashMap::new(), &only), only);
        assert_eq!(merge(only.clone(), &HashMap::new()), only);
    }

    #[test]
    fn test_flatten_concatenates_without_separator() {
        let mut headers = HeaderMap::new();
        headers.append("x", HeaderValue::from_static("a"));
        headers.append("x", HeaderValue::from_static("b"));

        let flattened = flatten_headers(&headers);
        assert_eq!(flattened["x"], "ab");
    }

    #[test]
    fn test_parse_cookies_last_duplicate_wins() {
        let cookies = parse_cookies(&inbound());
        assert_eq!(cookies["session"], "abc");
        assert_eq!(cookies["theme"], "light");
        assert_eq!(cookies["lang"], "en");
    }

    #[test]
    fn test_parse_cookies_skips_empty_names() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("; =orphan; flag; a=1"));

        let cookies = parse_cookies(&headers);
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies["flag"], "");
        assert_eq!(cookies["a"], "1");
    }

    #[test]
    fn test_to_outbound_without_inheritance() {
        let descriptor = descriptor(false, false);
        let id = descriptor.id;

        let outbound = to_outbound(descriptor, &inbound());
        assert_eq!(outbound.id, id);
        assert_eq!(outbound.method, "POST");
        assert_eq!(outbound.url, "https://example.test/api");
        assert_eq!(outbound.body, "{\"k\":1}");
        assert_eq!(outbound.proxy, "http://proxy.test:3128");
        assert_eq!(outbound.headers, map(&[("x-explicit", "1"), ("x-shared", "descriptor")]));
        assert_eq!(outbound.cookies, map(&[("session", "override")]));
    }

    #[test]
    fn test_to_outbound_with_inheritance() {
        let outbound = to_outbound(descriptor(true, true), &inbound());

        assert_eq!(outbound.headers["x-multi"], "ab");
        assert_eq!(outbound.headers["x-shared"], "descriptor");
        assert_eq!(outbound.headers["x-explicit"], "1");
        assert_eq!(outbound.headers["cookie"], "session=abc; theme=darklang=en; theme=\"light\"");

        assert_eq!(outbound.cookies["session"], "override");
        assert_eq!(outbound.cookies["theme"], "light");
        assert_eq!(outbound.cookies["lang"], "en");
    }

    #[test]
    fn test_descriptor_header_override_ignores_case() {
        let descriptor: RequestDescriptor = serde_json::from_value(serde_json::json!({
            "url": "https://example.test/",
            "inheritHeaders": true,
            "headers": {"X-Explicit": "descriptor", "Content-Type": "text/plain"}
        }))
        .unwrap();
        let mut inbound = HeaderMap::new();
        inbound.insert("x-explicit", HeaderValue::from_static("inbound"));
        inbound.insert("content-type", HeaderValue::from_static("application/json"));

        let outbound = to_outbound(descriptor, &inbound);
        assert_eq!(outbound.headers.len(), 2);
        assert_eq!(outbound.headers["x-explicit"], "descriptor");
        assert_eq!(outbound.headers["content-type"], "text/plain");
    }

    #[test]
    fn test_to_response_descriptor() {
        let outbound = to_outbound(descriptor(false, false), &HeaderMap::new());
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let response = to_response_descriptor(
            &outbound,
            RawResponse {
                status: StatusCode::CREATED,
                headers,
                body: b"created".to_vec(),
            },
        );

        assert_eq!(response.request_id, outbound.id);
        assert_ne!(response.id, response.request_id);
        assert_eq!(response.status_code, 201);
        assert_eq!(response.method, "POST");
        assert_eq!(response.url, "https://example.test/api");
        assert_eq!(response.headers["set-cookie"], "a=1b=2");
        assert_eq!(response.headers["content-type"], "text/plain");
        assert_eq!(response.body, "created");
    }

    #[test]
    fn test_invalid_utf8_body_is_replaced() {
        let outbound = to_outbound(descriptor(false, false), &HeaderMap::new());
        let response = to_response_descriptor(
            &outbound,
            RawResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: vec![b'o', 0xff, b'k'],
            },
        );
        assert_eq!(response.body, "o\u{fffd}k");
    }
}
