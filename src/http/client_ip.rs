//! Client IP resolution.

use axum::http::HeaderMap;
use std::net::SocketAddr;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Returned when neither headers nor the socket identify the client.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve the client IP for a request.
///
/// Order: first `X-Forwarded-For` entry, then `X-Real-IP`, then the socket
/// peer address. Header values are trimmed and used verbatim; they are not
/// required to parse as IP addresses.
pub fn resolve_client_ip(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    match remote_addr {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}
