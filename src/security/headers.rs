//! Client identity and forwarding headers.
//!
//! # Responsibilities
//! - Derive the rate-limit identity of a client
//! - Strip hop-by-hop headers from proxied requests
//! - Add `X-Forwarded-For` / `-Proto` / `-Host`
//!
//! # Design Decisions
//! - `X-Forwarded-For` is appended to, never replaced
//! - `X-Forwarded-Proto` and `X-Forwarded-Host` are only set when absent
//! - The first `X-Forwarded-For` hop identifies the client; otherwise the peer IP

use std::net::{IpAddr, SocketAddr};

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Key used to bucket a client for rate limiting.
pub fn client_key(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

/// Origin information attached to a proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedFor {
    pub client_ip: Option<IpAddr>,
    pub proto: String,
}

impl Default for ForwardedFor {
    fn default() -> Self {
        Self {
            client_ip: None,
            proto: "http".to_string(),
        }
    }
}

/// Remove connection-scoped headers in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Build the header set sent to the backend.
pub fn outbound_headers(inbound: &HeaderMap, origin: &ForwardedFor) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);

    if let Some(ip) = origin.client_ip {
        let chain = match inbound.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.trim().is_empty() => format!("{existing}, {ip}"),
            _ => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if !headers.contains_key(&X_FORWARDED_PROTO) {
        if let Ok(value) = HeaderValue::from_str(&origin.proto) {
            headers.insert(X_FORWARDED_PROTO, value);
        }
    }

    if !headers.contains_key(&X_FORWARDED_HOST) {
        if let Some(host) = inbound.get(header::HOST) {
            headers.insert(X_FORWARDED_HOST, host.clone());
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "10.0.0.9:5555".parse().unwrap()
    }

    #[test]
    fn test_client_key_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, peer()), "10.0.0.9");

        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"));
        assert_eq!(client_key(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn test_forwarding_headers_added() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert("x-custom", HeaderValue::from_static("1"));

        let origin = ForwardedFor {
            client_ip: Some("10.0.0.9".parse().unwrap()),
            proto: "http".into(),
        };
        let out = outbound_headers(&inbound, &origin);

        assert_eq!(out[&X_FORWARDED_FOR], "10.0.0.9");
        assert_eq!(out[&X_FORWARDED_PROTO], "http");
        assert_eq!(out[&X_FORWARDED_HOST], "gateway.local");
        assert_eq!(out["x-custom"], "1");
        assert!(!out.contains_key(header::CONNECTION));
    }

    #[test]
    fn test_existing_forwarding_headers_are_kept() {
        let mut inbound = HeaderMap::new();
        inbound.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.7"));
        inbound.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
        inbound.insert(X_FORWARDED_HOST, HeaderValue::from_static("shop.example"));
        inbound.insert(header::HOST, HeaderValue::from_static("gateway.local"));

        let origin = ForwardedFor {
            client_ip: Some("10.0.0.9".parse().unwrap()),
            proto: "http".into(),
        };
        let out = outbound_headers(&inbound, &origin);

        assert_eq!(out[&X_FORWARDED_FOR], "203.0.113.7, 10.0.0.9");
        assert_eq!(out[&X_FORWARDED_PROTO], "https");
        assert_eq!(out[&X_FORWARDED_HOST], "shop.example");
    }
}
