//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create one Axum Router per public listener
//! - Wire up middleware (tracing, body limit, request ID)
//! - Classify each request to a service and build its Context
//! - Hand the Context to the shared pipeline

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::SecurityConfig;
use crate::http::request::{client_ip, X_REQUEST_ID};
use crate::http::response::synthetic;
use crate::pipeline::{Context, Pipeline};
use crate::routing::ListenerRoutes;

/// State injected into the listener's handler.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<ListenerRoutes>,
    pub pipeline: Pipeline,
    pub public_port: u16,
    pub trust_forwarded_for: bool,
}

/// HTTP server for one public listener.
pub struct HttpServer {
    name: String,
    router: Router,
}

impl HttpServer {
    pub fn new(routes: ListenerRoutes, pipeline: Pipeline, public_port: u16, security: &SecurityConfig) -> Self {
        let name = routes.name.clone();
        let state = AppState {
            routes: Arc::new(routes),
            pipeline,
            public_port,
            trust_forwarded_for: security.trust_forwarded_for,
        };
        let router = Self::build_router(security, state);
        Self { name, router }
    }

    /// Every path and method lands in the gateway handler.
    fn build_router(security: &SecurityConfig, state: AppState) -> Router {
        Router::new()
            .fallback(gateway_handler)
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(security.max_body_size))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until the shutdown broadcast fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(listener = %self.name, address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!(listener = %self.name, "HTTP server stopped");
        Ok(())
    }
}

/// Classify, build the Context, run the pipeline.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    let ip = client_ip(request.headers(), peer, state.trust_forwarded_for);
    let target = state.routes.classify(request.uri().path()).clone();

    let mut ctx = match Context::new(request, ip, &target, state.public_port) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::debug!(client_ip = %ip, error = %e, "Unparseable request URL");
            return synthetic(StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    tracing::debug!(
        request_id = %ctx.request_id,
        service = %ctx.service,
        method = %ctx.request.method(),
        path = %ctx.path(),
        "Dispatching request"
    );
    state.pipeline.execute(&mut ctx).await
}
