//! Active liveness probing.
//!
//! # Responsibilities
//! - Periodically GET each running service's health path
//! - Fold results into the supervisor's runtime state

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::{HealthCheckConfig, ProxyConfig};
use crate::observability::metrics;
use crate::supervisor::ServiceManager;

pub struct HealthProber {
    services: ServiceManager,
    config: HealthCheckConfig,
    upstream_host: String,
    client: Client<HttpConnector, Body>,
}

impl HealthProber {
    pub fn new(services: ServiceManager, config: HealthCheckConfig, proxy: &ProxyConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            services,
            config,
            upstream_host: proxy.upstream_host.clone(),
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Liveness probes disabled");
            return;
        }

        tracing::info!(interval = self.config.interval_secs, "Health prober starting");

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health prober received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every running service once.
    pub async fn check_all(&self) {
        for (service, port, path) in self.services.probe_targets() {
            let success = self.probe(&service, port, &path).await;
            if let Some(healthy) =
                self.services
                    .record_probe(&service, success, self.config.unhealthy_threshold)
            {
                metrics::record_service_health(&service, healthy);
            }
        }
    }

    async fn probe(&self, service: &str, port: u16, path: &str) -> bool {
        let uri = format!("http://{}:{}{}", self.upstream_host, port, path);
        let request = match Request::builder()
            .method("GET")
            .uri(uri)
            .header("user-agent", "guardian-health-check")
            .body(Body::empty())
        {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(service = %service, error = %e, "Failed to build health check request");
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(service = %service, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(service = %service, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(service = %service, "Health check failed: timeout");
                false
            }
        }
    }
}
