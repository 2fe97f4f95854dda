//! Per-request context passed through the stage chain.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, Extensions, HeaderValue, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use url::Url;

use crate::http::request::{request_id_of, user_agent_of};
use crate::http::response::synthetic;
use crate::routing::RouteTarget;

/// Everything a stage needs to know about one inbound request.
///
/// Created by the HTTP handler, mutated in place by stages and dropped once
/// the response has been written.
pub struct Context {
    /// The inbound request. Stages may replace its body after buffering it.
    pub request: Request<Body>,

    /// Absolute URL as seen by the caller.
    pub url: Url,

    /// Caller address.
    pub client_ip: IpAddr,

    /// Caller user agent, empty when absent.
    pub user_agent: String,

    /// Service the request is routed to.
    pub service: String,

    /// Loopback port of the target service.
    pub internal_port: u16,

    /// Port of the public listener that accepted the request.
    pub public_port: u16,

    /// Correlation id, echoed upstream and to the caller.
    pub request_id: String,

    /// When the gateway started handling the request.
    pub started_at: Instant,

    /// Typed per-request values shared between stages.
    pub scratch: Extensions,

    /// Response chosen so far. Set once by the stage that answers.
    pub response: Option<Response<Body>>,

    pub(crate) current_stage: Option<&'static str>,
}

impl Context {
    pub fn new(
        request: Request<Body>,
        client_ip: IpAddr,
        target: &RouteTarget,
        public_port: u16,
    ) -> Result<Self, url::ParseError> {
        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .unwrap_or_else(|| format!("localhost:{public_port}"));
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = Url::parse(&format!("http://{host}{path_and_query}"))?;

        let request_id = request_id_of(&request);
        let user_agent = user_agent_of(&request);

        Ok(Self {
            request,
            url,
            client_ip,
            user_agent,
            service: target.service.clone(),
            internal_port: target.internal_port,
            public_port,
            request_id,
            started_at: Instant::now(),
            scratch: Extensions::new(),
            response: None,
            current_stage: None,
        })
    }

    /// Raw request path.
    pub fn path(&self) -> &str {
        self.request.uri().path()
    }

    /// Raw query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.request.uri().query()
    }

    /// Percent-decoded path.
    pub fn decoded_path(&self) -> String {
        percent_decode_str(self.path()).decode_utf8_lossy().into_owned()
    }

    /// Percent-decoded query with `+` read as a space.
    pub fn decoded_query(&self) -> String {
        let query = self.query().unwrap_or_default().replace('+', " ");
        percent_decode_str(&query).decode_utf8_lossy().into_owned()
    }

    /// True for WebSocket upgrade requests.
    pub fn is_upgrade(&self) -> bool {
        let headers = self.request.headers();
        let connection_upgrade = headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")));
        let websocket = headers
            .get(header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        connection_upgrade && websocket
    }

    /// Answer with a short plain-text response.
    pub fn respond(&mut self, status: StatusCode, message: &str) {
        self.response = Some(synthetic(status, message));
    }

    /// Answer with a prepared response.
    pub fn respond_with(&mut self, response: Response<Body>) {
        self.response = Some(response);
    }

    /// Status of the chosen response, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|r| r.status())
    }

    /// Set a header on the chosen response, if any.
    pub fn set_response_header(&mut self, name: header::HeaderName, value: HeaderValue) {
        if let Some(response) = self.response.as_mut() {
            response.headers_mut().insert(name, value);
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stage currently handling the request.
    pub fn current_stage(&self) -> Option<&'static str> {
        self.current_stage
    }
}
