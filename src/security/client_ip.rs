//! Client address resolution for rate limiting and audit events.
//!
//! `X-Forwarded-For` is only honored when the server is configured to sit
//! behind a trusted reverse proxy; otherwise any client could pick its own key.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve the address a request is counted against.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(ip) = forwarded_for(headers) {
            return ip.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// First (client-most) valid entry of `X-Forwarded-For`.
fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .and_then(|entry| entry.trim().parse().ok())
}
