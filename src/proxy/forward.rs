//! Upstream request construction and response relaying.

use axum::body::{Body, Bytes};
use axum::http::uri::InvalidUri;
use axum::http::{header, HeaderMap, HeaderValue, Response, Uri};

use crate::http::response::rewrite_location;
use crate::pipeline::Context;
use crate::security::headers::{add_forwarded_headers, strip_hop_by_hop};

/// Request body as seen by the retry loop.
pub enum OutboundBody {
    /// Buffered; every attempt gets a copy.
    Replayable(Bytes),
    /// Streamed; only the first attempt gets it.
    Once(Option<Body>),
}

impl OutboundBody {
    pub fn for_attempt(&mut self) -> Body {
        match self {
            OutboundBody::Replayable(bytes) => Body::from(bytes.clone()),
            OutboundBody::Once(body) => body.take().unwrap_or_default(),
        }
    }
}

/// `http://<host>:<port>` followed by the inbound path and query.
pub fn upstream_uri(scheme: &str, host: &str, port: u16, inbound: &Uri) -> Result<Uri, InvalidUri> {
    let path_and_query = inbound.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{scheme}://{host}:{port}{path_and_query}").parse()
}

/// Inbound headers minus hop-by-hop, plus forwarding headers.
pub fn upstream_headers(ctx: &Context) -> HeaderMap {
    let mut headers = ctx.request.headers().clone();
    strip_hop_by_hop(&mut headers);
    add_forwarded_headers(&mut headers, ctx);
    headers
}

/// Pass an upstream response through, fixing only what must change at the edge.
pub fn relay<B>(response: Response<B>, ctx: &Context) -> Response<Body>
where
    B: axum::body::HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<axum::BoxError>,
{
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    let rewritten = parts
        .headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|location| rewrite_location(location, ctx.internal_port, &ctx.url));
    if let Some(location) = rewritten {
        if let Ok(value) = HeaderValue::from_str(&location) {
            parts.headers.insert(header::LOCATION, value);
        }
    }

    Response::from_parts(parts, Body::new(body))
}
