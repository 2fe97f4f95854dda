//! Reverse proxy: the terminal pipeline stage.
//!
//! # Data Flow
//! ```text
//! Context
//!     → service Starting/Crashed? → 503
//!     → WebSocket upgrade? → http::websocket bridge
//!     → forward.rs (upstream URI, headers)
//!     → attempt with deadline
//!         → refused or dropped connection / deadline on an idempotent method → backoff, retry
//!         → exhausted: 502, or 504 when the last attempt timed out
//!     → forward.rs relay (hop-by-hop stripped, Location rewritten)
//! ```
//!
//! # Design Decisions
//! - Redirects are never followed
//! - Bodies of idempotent requests are buffered so they can be replayed;
//!   everything else is streamed once
//! - Upstream statuses, whatever they are, are final

pub mod forward;

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{FromRequestParts, WebSocketUpgrade};
use axum::http::{Request, StatusCode, Version};
use axum::response::IntoResponse;
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::{connect::HttpConnector, Client, Error as LegacyError};
use hyper_util::rt::TokioExecutor;

use crate::config::ProxyConfig;
use crate::http::websocket;
use crate::observability::metrics;
use crate::pipeline::{BoxError, Context, Next, Stage};
use crate::resilience::{is_idempotent, AttemptFailure, NotAttempted, RetryPolicy};
use crate::supervisor::ServiceManager;
use forward::{relay, upstream_headers, upstream_uri, OutboundBody};

pub struct ProxyStage {
    client: Client<HttpConnector, Body>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    max_buffered_body: usize,
    upstream_host: String,
    services: Option<ServiceManager>,
}

impl ProxyStage {
    pub fn new(config: &ProxyConfig, services: Option<ServiceManager>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(config.connect_timeout_ms)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            retry: RetryPolicy::from_config(config),
            attempt_timeout: Duration::from_secs(config.upstream_timeout_secs),
            max_buffered_body: config.max_buffered_body_bytes,
            upstream_host: config.upstream_host.clone(),
            services,
        }
    }

    async fn forward(&self, ctx: &mut Context) -> Result<(), BoxError> {
        let method = ctx.request.method().clone();
        let uri = upstream_uri("http", &self.upstream_host, ctx.internal_port, ctx.request.uri())?;
        let headers = upstream_headers(ctx);

        let inbound = std::mem::take(ctx.request.body_mut());
        let mut body = if is_idempotent(&method) {
            match axum::body::to_bytes(inbound, self.max_buffered_body).await {
                Ok(bytes) => OutboundBody::Replayable(bytes),
                Err(e) => {
                    tracing::debug!(request_id = %ctx.request_id, error = %e, "Request body too large to buffer");
                    ctx.respond(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large");
                    return Ok(());
                }
            }
        } else {
            OutboundBody::Once(Some(inbound))
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = Request::builder()
                .method(method.clone())
                .uri(uri.clone())
                .version(Version::HTTP_11)
                .body(body.for_attempt())?;
            *request.headers_mut() = headers.clone();

            let failure = match tokio::time::timeout(self.attempt_timeout, self.client.request(request)).await {
                Ok(Ok(response)) => {
                    let response = relay(response, ctx);
                    ctx.respond_with(response);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    let failure = classify(&e);
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        service = %ctx.service,
                        attempt,
                        error = %e,
                        "Upstream error"
                    );
                    failure
                }
                Err(_) => {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        service = %ctx.service,
                        attempt,
                        timeout = ?self.attempt_timeout,
                        "Upstream attempt timed out"
                    );
                    AttemptFailure::Timeout
                }
            };

            match self.retry.next_delay(&method, attempt, failure) {
                Some(delay) => {
                    metrics::record_retry(&ctx.service);
                    tracing::info!(request_id = %ctx.request_id, attempt, delay = ?delay, "Retrying upstream request");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    if failure == AttemptFailure::Timeout {
                        ctx.respond(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout");
                    } else {
                        ctx.respond(StatusCode::BAD_GATEWAY, "Bad Gateway");
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn upgrade(&self, ctx: &mut Context) -> Result<(), BoxError> {
        let url = upstream_uri("ws", &self.upstream_host, ctx.internal_port, ctx.request.uri())?.to_string();
        let headers = upstream_headers(ctx);

        // The upgrade handle lives in the request extensions; move it out.
        let mut handshake = Request::new(());
        *handshake.method_mut() = ctx.request.method().clone();
        *handshake.uri_mut() = ctx.request.uri().clone();
        *handshake.version_mut() = ctx.request.version();
        *handshake.headers_mut() = ctx.request.headers().clone();
        *handshake.extensions_mut() = std::mem::take(ctx.request.extensions_mut());
        let (mut parts, ()) = handshake.into_parts();

        match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(ws) => {
                let response = websocket::bridge(ws, url, bridged_headers(headers), ctx.service.clone());
                ctx.respond_with(response);
            }
            Err(rejection) => ctx.respond_with(rejection.into_response()),
        }
        Ok(())
    }
}

/// Failures before a response head arrived. Refused, reset and prematurely
/// closed connections all count as the upstream being unreachable.
fn classify(error: &LegacyError) -> AttemptFailure {
    if error.is_connect() {
        return AttemptFailure::Connect;
    }
    let mut source = StdError::source(error);
    while let Some(cause) = source {
        if let Some(e) = cause.downcast_ref::<hyper::Error>() {
            if e.is_incomplete_message() || e.is_canceled() {
                return AttemptFailure::Connect;
            }
        }
        if let Some(e) = cause.downcast_ref::<io::Error>() {
            if is_dropped_connection(e.kind()) {
                return AttemptFailure::Connect;
            }
        }
        source = cause.source();
    }
    AttemptFailure::Other
}

fn is_dropped_connection(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// Handshake headers are generated by the WebSocket client; keep only
/// what the upstream needs to identify the caller.
fn bridged_headers(headers: axum::http::HeaderMap) -> axum::http::HeaderMap {
    const KEEP: [&str; 9] = [
        "cookie",
        "authorization",
        "origin",
        "user-agent",
        "x-forwarded-for",
        "x-forwarded-host",
        "x-forwarded-proto",
        "x-real-ip",
        "x-request-id",
    ];
    headers
        .into_iter()
        .filter_map(|(name, value)| name.map(|n| (n, value)))
        .filter(|(name, _)| KEEP.contains(&name.as_str()))
        .collect()
}

impl Stage for ProxyStage {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, _next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            if self.services.as_ref().is_some_and(|s| s.is_unavailable(&ctx.service)) {
                tracing::debug!(service = %ctx.service, "Service not ready, failing fast");
                ctx.scratch.insert(NotAttempted);
                ctx.respond(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable");
                return Ok(());
            }

            if ctx.is_upgrade() {
                self.upgrade(ctx).await
            } else {
                self.forward(ctx).await
            }
        })
    }
}
