//! Synthetic responses and upstream response rewriting.
//!
//! # Responsibilities
//! - Build the short plain-text responses stages answer with
//! - Rewrite redirects that leak the internal port
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Backend timeouts result in 504 Gateway Timeout

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};
use url::Url;

/// Plain-text response with the given status and message.
pub fn synthetic(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Plain-text response carrying a `Retry-After` in seconds.
pub fn retry_after(status: StatusCode, message: &str, seconds: u64) -> Response<Body> {
    let mut response = synthetic(status, message);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(seconds.max(1)));
    response
}

/// Rewrite a `Location` that points at the internal listener so it names the
/// public host instead. Returns `None` when no rewrite applies.
pub fn rewrite_location(location: &str, internal_port: u16, public: &Url) -> Option<String> {
    let mut target = Url::parse(location).ok()?;
    let loopback = matches!(target.host_str(), Some("127.0.0.1" | "localhost" | "[::1]"));
    if !loopback || target.port_or_known_default() != Some(internal_port) {
        return None;
    }
    target.set_scheme(public.scheme()).ok()?;
    target.set_host(public.host_str()).ok()?;
    target.set_port(public.port()).ok()?;
    Some(target.to_string())
}
