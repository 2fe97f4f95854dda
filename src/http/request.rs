//! Request inspection helpers.
//!
//! # Responsibilities
//! - Read the correlation id assigned by the request-id layer
//! - Determine the caller IP
//! - Extract the user agent
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - X-Forwarded-For is honored only when explicitly trusted

use std::net::{IpAddr, SocketAddr};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Request};

/// Correlation header set on inbound requests and echoed on responses.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Correlation id of a request, generating one when the header is missing.
pub fn request_id_of(request: &Request<Body>) -> String {
    request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// User agent of a request, empty when absent.
pub fn user_agent_of(request: &Request<Body>) -> String {
    request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Caller IP: the socket peer, or the first X-Forwarded-For hop when trusted.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    peer.ip()
}
