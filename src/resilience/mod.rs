//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → circuit_breaker.rs (fail fast when open, record outcome)
//!     → proxy attempt with per-attempt deadline
//!     → On failure: retries.rs (check if retryable, wait backoff.rs delay)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream attempt has a deadline
//! - Retries only for idempotent requests (GET, HEAD, etc.)
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{CircuitBreakerStage, CircuitBreakers, CircuitSnapshot, CircuitStatus, NotAttempted};
pub use retries::{is_idempotent, AttemptFailure, RetryPolicy};
