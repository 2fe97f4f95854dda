//! Header manipulation and security headers.
//!
//! # Responsibilities
//! - Add X-Forwarded-For, X-Forwarded-Proto, X-Forwarded-Host, X-Real-IP
//! - Strip hop-by-hop headers
//! - Add security response headers
//!
//! # Design Decisions
//! - Preserve the caller chain in X-Forwarded-For by appending
//! - Hardening headers never override what the upstream already chose

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use futures_util::future::BoxFuture;

use crate::config::SecurityConfig;
use crate::http::request::X_REQUEST_ID;
use crate::pipeline::{BoxError, Context, Next, Stage};

/// Headers meaningful only for a single transport-level connection.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Add the forwarding headers an upstream expects from a gateway.
pub fn add_forwarded_headers(headers: &mut HeaderMap, ctx: &Context) {
    let ip = ctx.client_ip.to_string();
    let forwarded_for = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}, {ip}"),
        _ => ip.clone(),
    };

    let host = match ctx.url.port() {
        Some(port) => format!("{}:{port}", ctx.url.host_str().unwrap_or("localhost")),
        None => ctx.url.host_str().unwrap_or("localhost").to_string(),
    };

    let values = [
        (HeaderName::from_static("x-forwarded-for"), forwarded_for),
        (HeaderName::from_static("x-forwarded-host"), host),
        (HeaderName::from_static("x-forwarded-proto"), ctx.url.scheme().to_string()),
        (HeaderName::from_static("x-real-ip"), ip),
        (X_REQUEST_ID, ctx.request_id.clone()),
    ];
    for (name, value) in values {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

/// Adds hardening headers to every response passing back through it.
pub struct SecurityHeadersStage {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeadersStage {
    pub fn new(config: &SecurityConfig) -> Self {
        let mut headers = vec![
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN")),
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (
                header::REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ),
        ];
        if config.hsts {
            headers.push((
                header::STRICT_TRANSPORT_SECURITY,
                HeaderValue::from_static("max-age=31536000; includeSubDomains"),
            ));
        }
        match HeaderValue::from_str(&config.content_security_policy) {
            Ok(csp) if !config.content_security_policy.is_empty() => {
                headers.push((header::CONTENT_SECURITY_POLICY, csp));
            }
            Ok(_) => {}
            Err(_) => tracing::warn!("Ignoring invalid content security policy"),
        }
        Self { headers }
    }

    fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            if !target.contains_key(name) {
                target.insert(name.clone(), value.clone());
            }
        }
    }
}

impl Stage for SecurityHeadersStage {
    fn name(&self) -> &'static str {
        "security-headers"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            next.run(ctx).await?;
            if let Some(response) = ctx.response.as_mut() {
                self.apply(response.headers_mut());
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::test_support::context;
    use crate::pipeline::Pipeline;
    use axum::http::StatusCode;

    #[test]
    fn strips_hop_by_hop_and_connection_named_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "keep-alive, x-private".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert("x-private", "secret".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert(header::ACCEPT, "*/*".parse().unwrap());

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn appends_forwarded_for() {
        let ctx = context("GET", "/");
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());

        add_forwarded_headers(&mut headers, &ctx);

        assert_eq!(headers["x-forwarded-for"], "203.0.113.9, 10.1.2.3");
        assert_eq!(headers["x-real-ip"], "10.1.2.3");
        assert_eq!(headers["x-forwarded-host"], "example.test:3000");
        assert_eq!(headers["x-forwarded-proto"], "http");
        assert_eq!(headers["x-request-id"], ctx.request_id.as_str());
    }

    struct Upstream;

    impl Stage for Upstream {
        fn name(&self) -> &'static str {
            "upstream"
        }

        fn handle<'a>(&'a self, ctx: &'a mut Context, _next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>> {
            Box::pin(async move {
                let mut response = crate::http::response::synthetic(StatusCode::OK, "ok");
                response
                    .headers_mut()
                    .insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
                ctx.respond_with(response);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn adds_missing_headers_without_overriding() {
        let pipeline = Pipeline::builder()
            .stage(SecurityHeadersStage::new(&SecurityConfig::default()))
            .stage(Upstream)
            .build();

        let response = pipeline.execute(&mut context("GET", "/")).await;
        let headers = response.headers();
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[header::CONTENT_SECURITY_POLICY], "default-src 'self'");
        assert!(headers.contains_key(header::STRICT_TRANSPORT_SECURITY));
    }
}
