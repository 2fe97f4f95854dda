//! Per-IP token bucket rate limiting.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use dashmap::DashMap;
use futures_util::future::BoxFuture;

use crate::config::RateLimitConfig;
use crate::http::response::retry_after;
use crate::observability::metrics;
use crate::pipeline::{BoxError, Context, Next, Stage};

/// A simple token bucket rate limiter.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole seconds until one token is available.
    fn retry_after_secs(&self, refill_rate: f64) -> u64 {
        let missing = (1.0 - self.tokens).max(0.0);
        ((missing / refill_rate).ceil() as u64).max(1)
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

/// Buckets keyed by caller IP.
pub struct RateLimiter {
    buckets: DashMap<IpAddr, TokenBucket>,
    capacity: f64,
    fill_rate: f64,
    idle_ttl: Duration,
    sweep_interval: Duration,
    last_sweep: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: config.capacity,
            fill_rate: config.fill_rate,
            idle_ttl: Duration::from_secs(config.idle_ttl_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn check(&self, ip: IpAddr) -> Decision {
        self.check_at(ip, Instant::now())
    }

    /// Check against an explicit clock reading.
    pub fn check_at(&self, ip: IpAddr, now: Instant) -> Decision {
        self.maybe_sweep(now);

        let mut bucket = self
            .buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::new(self.capacity, now));
        if bucket.try_acquire(self.capacity, self.fill_rate, now) {
            Decision::Allowed
        } else {
            Decision::Limited {
                retry_after_secs: bucket.retry_after_secs(self.fill_rate),
            }
        }
    }

    /// Drop buckets idle for longer than the idle TTL.
    pub fn purge_idle(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, b| now.saturating_duration_since(b.last_update) <= self.idle_ttl);
        before.saturating_sub(self.buckets.len())
    }

    fn maybe_sweep(&self, now: Instant) {
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last) < self.sweep_interval {
            return;
        }
        *last = now;
        drop(last);

        let purged = self.purge_idle(now);
        if purged > 0 {
            tracing::debug!(purged, "Purged idle rate limit buckets");
        }
    }

    /// Number of tracked callers.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Rejects callers that exhausted their bucket with 429.
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            match self.limiter.check(ctx.client_ip) {
                Decision::Allowed => next.run(ctx).await?,
                Decision::Limited { retry_after_secs } => {
                    tracing::warn!(client = %ctx.client_ip, retry_after_secs, "Rate limit exceeded");
                    metrics::record_rate_limited();
                    ctx.respond_with(retry_after(
                        StatusCode::TOO_MANY_REQUESTS,
                        "Too Many Requests",
                        retry_after_secs,
                    ));
                }
            }
            Ok(())
        })
    }
}
