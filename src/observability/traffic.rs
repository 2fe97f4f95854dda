//! Per-request traffic accounting.
//!
//! # Responsibilities
//! - Count requests per day and service (`traffic:<day>:<service>`)
//! - Record latency and status metrics
//! - Optionally persist a trace of every request (`trace:<ts>:<id>`)
//!
//! # Design Decisions
//! - Runs outermost so it sees every response, synthetic or upstream
//! - Trace recording can be toggled at runtime from the dashboard

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::cache::CacheStatus;
use crate::config::ObservabilityConfig;
use crate::observability::metrics;
use crate::pipeline::{BoxError, Context, Next, Stage};
use crate::storage::{best_effort, day_bucket, unix_millis, SharedStore};

/// Persisted summary of one request.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub service: String,
    pub client_ip: String,
    pub user_agent: String,
    pub status: u16,
    pub duration_ms: u64,
    pub cache: Option<&'static str>,
    pub at_ms: u64,
}

pub struct TrafficRecorder {
    store: SharedStore,
    recording: AtomicBool,
    trace_ttl: Duration,
}

impl TrafficRecorder {
    pub fn new(store: SharedStore, config: &ObservabilityConfig) -> Self {
        Self {
            store,
            recording: AtomicBool::new(config.trace_recording),
            trace_ttl: Duration::from_secs(config.trace_ttl_secs),
        }
    }

    pub fn set_trace_recording(&self, enabled: bool) {
        self.recording.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled, "Trace recording toggled");
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    /// Count one finished request and, when recording, persist its trace.
    pub fn record(&self, trace: TraceRecord) {
        let day = day_bucket();
        best_effort(
            "count traffic",
            self.store.incr(&format!("traffic:{}:{}", day, trace.service), 1),
        );
        best_effort(
            "count traffic status",
            self.store.incr(
                &format!("traffic:{}:{}:{}xx", day, trace.service, trace.status / 100),
                1,
            ),
        );

        if !self.is_recording() {
            return;
        }
        let key = format!("trace:{:013}:{}", trace.at_ms, trace.request_id);
        match serde_json::to_value(&trace) {
            Ok(value) => {
                best_effort("record trace", self.store.set(&key, value, Some(self.trace_ttl)));
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize trace"),
        }
    }
}

pub struct TrafficStage {
    recorder: Arc<TrafficRecorder>,
}

impl TrafficStage {
    pub fn new(recorder: Arc<TrafficRecorder>) -> Self {
        Self { recorder }
    }
}

impl Stage for TrafficStage {
    fn name(&self) -> &'static str {
        "traffic"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            let method = ctx.request.method().to_string();
            let path = ctx.path().to_string();
            let query = ctx.query().map(str::to_string);

            let result = next.run(ctx).await;

            // A failed chain becomes a 500 at the pipeline boundary.
            let status = match (&result, ctx.status()) {
                (Ok(()), Some(status)) => status,
                (Ok(()), None) => StatusCode::NOT_FOUND,
                (Err(_), _) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let elapsed = ctx.elapsed();
            metrics::record_request(&ctx.service, status.as_u16(), elapsed);

            tracing::debug!(
                request_id = %ctx.request_id,
                service = %ctx.service,
                method = %method,
                path = %path,
                status = status.as_u16(),
                duration_ms = elapsed.as_millis() as u64,
                "Request finished"
            );

            self.recorder.record(TraceRecord {
                request_id: ctx.request_id.clone(),
                method,
                path,
                query,
                service: ctx.service.clone(),
                client_ip: ctx.client_ip.to_string(),
                user_agent: ctx.user_agent.clone(),
                status: status.as_u16(),
                duration_ms: elapsed.as_millis() as u64,
                cache: ctx.scratch.get::<CacheStatus>().map(|c| c.as_str()),
                at_ms: unix_millis(),
            });

            result?;
            Ok(())
        })
    }
}
