//! Retry logic.
//!
//! # Responsibilities
//! - Determine if request is retryable (idempotent methods only)
//! - Classify attempt failures
//! - Schedule retries with linear backoff
//!
//! # Design Decisions
//! - Never retry POST/PUT/DELETE/PATCH (non-idempotent)
//! - Only connection failures and attempt deadlines are retried
//! - Upstream responses, whatever their status, are final

use std::time::Duration;

use axum::http::Method;

use crate::config::ProxyConfig;
use crate::resilience::backoff::linear_backoff;

/// Methods safe to replay against an upstream.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

/// Why a single upstream attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The upstream could not be reached.
    Connect,
    /// The attempt exceeded its deadline.
    Timeout,
    /// Anything else (protocol errors, aborted bodies).
    Other,
}

impl AttemptFailure {
    pub fn is_retryable(self) -> bool {
        matches!(self, AttemptFailure::Connect | AttemptFailure::Timeout)
    }
}

/// Retry budget for one request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Delay before retrying when `attempt` (1-based) failed with `failure`,
    /// or `None` when the request must fail now.
    pub fn next_delay(&self, method: &Method, attempt: u32, failure: AttemptFailure) -> Option<Duration> {
        if !is_idempotent(method) || !failure.is_retryable() || attempt > self.max_retries {
            return None;
        }
        Some(linear_backoff(attempt, self.base_delay))
    }
}
