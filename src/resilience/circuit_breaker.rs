//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast with 503
//! - Half-Open: cooldown elapsed, traffic allowed again on probation
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: first request after the cooldown
//! Half-Open → Closed: one success
//! Half-Open → Open: one failure (fresh cooldown)
//! ```
//!
//! # Design Decisions
//! - Per-service circuit breaker (not global), created lazily
//! - Fail fast in Open state (no waiting for timeout)
//! - Half-Open admits every request, not a single probe
//! - Only 502, 503 and 504 count as failures; application errors pass through

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::config::CircuitBreakerConfig;
use crate::http::response::{retry_after, synthetic};
use crate::observability::metrics;
use crate::pipeline::{BoxError, Context, Next, Stage};
use crate::supervisor::ServiceManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    fn gauge(self) -> f64 {
        match self {
            CircuitStatus::Closed => 0.0,
            CircuitStatus::HalfOpen => 1.0,
            CircuitStatus::Open => 2.0,
        }
    }
}

/// Breaker state of one service.
#[derive(Debug, Clone)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub next_retry_at: Option<Instant>,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            next_retry_at: None,
        }
    }
}

/// Serializable view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    /// Seconds until an open circuit admits traffic again.
    pub retry_in_secs: Option<u64>,
}

/// Whether a request may reach the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after_secs: u64 },
}

/// Scratch marker set when the response was produced without contacting the
/// upstream. Such responses say nothing about upstream health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotAttempted;

/// True for upstream statuses that count against the breaker.
pub fn is_failure(status: StatusCode) -> bool {
    (502..=504).contains(&status.as_u16())
}

/// Breaker table keyed by service name.
pub struct CircuitBreakers {
    states: DashMap<String, CircuitState>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreakers {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            states: DashMap::new(),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }

    pub fn allow(&self, service: &str) -> Admission {
        self.allow_at(service, Instant::now())
    }

    pub fn allow_at(&self, service: &str, now: Instant) -> Admission {
        let mut state = self.states.entry(service.to_string()).or_default();
        match state.status {
            CircuitStatus::Closed | CircuitStatus::HalfOpen => Admission::Allowed,
            CircuitStatus::Open => {
                let retry_at = state.next_retry_at.unwrap_or(now);
                if now >= retry_at {
                    state.status = CircuitStatus::HalfOpen;
                    tracing::info!(service, "Circuit half-open, admitting traffic");
                    metrics::record_circuit_state(service, CircuitStatus::HalfOpen.gauge());
                    Admission::Allowed
                } else {
                    let remaining = retry_at.duration_since(now).as_secs_f64().ceil() as u64;
                    Admission::Rejected {
                        retry_after_secs: remaining.max(1),
                    }
                }
            }
        }
    }

    /// Classify an upstream status and record it.
    pub fn record(&self, service: &str, status: StatusCode) {
        if is_failure(status) {
            self.record_failure(service);
        } else {
            self.record_success(service);
        }
    }

    pub fn record_success(&self, service: &str) {
        let mut state = self.states.entry(service.to_string()).or_default();
        match state.status {
            CircuitStatus::HalfOpen => {
                *state = CircuitState::default();
                tracing::info!(service, "Circuit closed");
                metrics::record_circuit_state(service, CircuitStatus::Closed.gauge());
            }
            CircuitStatus::Closed => state.consecutive_failures = 0,
            // Stragglers admitted before the circuit opened do not close it.
            CircuitStatus::Open => {}
        }
    }

    pub fn record_failure(&self, service: &str) {
        self.record_failure_at(service, Instant::now());
    }

    pub fn record_failure_at(&self, service: &str, now: Instant) {
        let mut state = self.states.entry(service.to_string()).or_default();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure_at = Some(now);

        let trip = match state.status {
            CircuitStatus::HalfOpen => true,
            CircuitStatus::Closed => state.consecutive_failures >= self.failure_threshold,
            CircuitStatus::Open => false,
        };
        if trip {
            state.status = CircuitStatus::Open;
            state.next_retry_at = Some(now + self.cooldown);
            tracing::warn!(
                service,
                failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit opened"
            );
            metrics::record_circuit_state(service, CircuitStatus::Open.gauge());
        }
    }

    pub fn state(&self, service: &str) -> Option<CircuitState> {
        self.states.get(service).map(|s| s.clone())
    }

    /// Force a breaker back to Closed.
    pub fn reset(&self, service: &str) {
        self.states.insert(service.to_string(), CircuitState::default());
        metrics::record_circuit_state(service, CircuitStatus::Closed.gauge());
    }

    /// Every breaker, sorted by service name.
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let now = Instant::now();
        let mut snapshot: Vec<_> = self
            .states
            .iter()
            .map(|entry| {
                let state = entry.value();
                let retry_in_secs = match (state.status, state.next_retry_at) {
                    (CircuitStatus::Open, Some(at)) => {
                        Some(at.saturating_duration_since(now).as_secs_f64().ceil() as u64)
                    }
                    _ => None,
                };
                CircuitSnapshot {
                    service: entry.key().clone(),
                    status: state.status,
                    consecutive_failures: state.consecutive_failures,
                    retry_in_secs,
                }
            })
            .collect();
        snapshot.sort_by(|a, b| a.service.cmp(&b.service));
        snapshot
    }
}

/// Fails fast for open circuits and stopped services; records upstream outcomes.
pub struct CircuitBreakerStage {
    breakers: Arc<CircuitBreakers>,
    services: Option<ServiceManager>,
}

impl CircuitBreakerStage {
    pub fn new(breakers: Arc<CircuitBreakers>, services: Option<ServiceManager>) -> Self {
        Self { breakers, services }
    }
}

impl Stage for CircuitBreakerStage {
    fn name(&self) -> &'static str {
        "circuit-breaker"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            if self.services.as_ref().is_some_and(|s| s.is_stopped(&ctx.service)) {
                tracing::debug!(service = %ctx.service, "Service stopped, failing fast");
                ctx.respond_with(synthetic(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable"));
                return Ok(());
            }

            if let Admission::Rejected { retry_after_secs } = self.breakers.allow(&ctx.service) {
                tracing::debug!(service = %ctx.service, retry_after_secs, "Circuit open, failing fast");
                ctx.respond_with(retry_after(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service Unavailable",
                    retry_after_secs,
                ));
                return Ok(());
            }

            next.run(ctx).await?;
            if ctx.scratch.get::<NotAttempted>().is_some() {
                return Ok(());
            }
            if let Some(status) = ctx.status() {
                self.breakers.record(&ctx.service, status);
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
    use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

    fn breakers(threshold: u32, cooldown_secs: u64) -> CircuitBreakers {
        CircuitBreakers::new(&CircuitBreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            cooldown_secs,
        })
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = breakers(3, 30);
        let now = Instant::now();
        cb.record_failure_at("api", now);
        cb.record_failure_at("api", now);
        cb.record_success("api");
        cb.record_failure_at("api", now);
        cb.record_failure_at("api", now);
        assert_eq!(cb.allow_at("api", now), Admission::Allowed);

        cb.record_failure_at("api", now);
        assert_eq!(cb.state("api").unwrap().status, CircuitStatus::Open);
        assert_eq!(
            cb.allow_at("api", now + Duration::from_secs(10)),
            Admission::Rejected { retry_after_secs: 20 }
        );
    }

    #[test]
    fn half_open_success_closes_and_resets() {
        let cb = breakers(1, 30);
        let now = Instant::now();
        cb.record_failure_at("api", now);

        let later = now + Duration::from_secs(30);
        assert_eq!(cb.allow_at("api", later), Admission::Allowed);
        assert_eq!(cb.state("api").unwrap().status, CircuitStatus::HalfOpen);
        // Half-open admits everything, not a single probe.
        assert_eq!(cb.allow_at("api", later), Admission::Allowed);

        cb.record("api", StatusCode::OK);
        let state = cb.state("api").unwrap();
        assert_eq!(state.status, CircuitStatus::Closed);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_cooldown() {
        let cb = breakers(1, 30);
        let now = Instant::now();
        cb.record_failure_at("api", now);

        let later = now + Duration::from_secs(31);
        cb.allow_at("api", later);
        cb.record_failure_at("api", later);

        let state = cb.state("api").unwrap();
        assert_eq!(state.status, CircuitStatus::Open);
        assert_eq!(state.next_retry_at, Some(later + Duration::from_secs(30)));
    }

    #[test]
    fn only_gateway_statuses_are_failures() {
        assert!(is_failure(StatusCode::BAD_GATEWAY));
        assert!(is_failure(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_failure(StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_failure(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_failure(StatusCode::NOT_FOUND));
    }

    #[test]
    fn snapshot_lists_services() {
        let cb = breakers(1, 30);
        cb.record_failure("web");
        cb.record_success("api");
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].service, "api");
        assert_eq!(snapshot[1].status, CircuitStatus::Open);
        assert!(snapshot[1].retry_in_secs.is_some());

        cb.reset("web");
        assert_eq!(cb.state("web").unwrap().status, CircuitStatus::Closed);
    }

    /// Terminal stage answering with a configurable status and counting calls.
    struct FakeUpstream {
        status: Arc<AtomicU16>,
        calls: Arc<AtomicUsize>,
    }

    impl Stage for FakeUpstream {
        fn name(&self) -> &'static str {
            "proxy"
        }

        fn handle<'a>(&'a self, ctx: &'a mut Context, _next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let status = StatusCode::from_u16(self.status.load(Ordering::SeqCst))?;
                ctx.respond(status, "upstream");
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn stage_short_circuits_without_calling_upstream() {
        let status = Arc::new(AtomicU16::new(502));
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::builder()
            .stage(CircuitBreakerStage::new(Arc::new(breakers(2, 30)), None))
            .stage(FakeUpstream {
                status: status.clone(),
                calls: calls.clone(),
            })
            .build();

        for _ in 0..2 {
            let response = pipeline.execute(&mut context("GET", "/")).await;
            assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        }

        status.store(200, Ordering::SeqCst);
        let response = pipeline.execute(&mut context("GET", "/")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key("retry-after"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Terminal stage that refuses locally, as the proxy does for services
    /// that are not ready.
    struct LocalRefusal;

    impl Stage for LocalRefusal {
        fn name(&self) -> &'static str {
            "proxy"
        }

        fn handle<'a>(&'a self, ctx: &'a mut Context, _next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>> {
            Box::pin(async move {
                ctx.scratch.insert(NotAttempted);
                ctx.respond(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable");
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn local_refusals_do_not_count_as_failures() {
        let breakers = Arc::new(breakers(2, 30));
        let pipeline = Pipeline::builder()
            .stage(CircuitBreakerStage::new(breakers.clone(), None))
            .stage(LocalRefusal)
            .build();

        for _ in 0..5 {
            let response = pipeline.execute(&mut context("GET", "/")).await;
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        }

        let state = breakers.state("frontend").unwrap();
        assert_eq!(state.status, CircuitStatus::Closed);
        assert_eq!(state.consecutive_failures, 0);
    }
}
