//! Linear retry backoff.

use std::time::Duration;

/// Delay before retry number `attempt` (1-based): `base × attempt`.
pub fn linear_backoff(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt)
}
