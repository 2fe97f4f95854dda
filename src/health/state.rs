//! Liveness state machine for supervised services.
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures reach unhealthy_threshold
//! Unhealthy → Healthy: any successful probe
//! ```
//!
//! # Design Decisions
//! - Failures below the threshold leave health unchanged
//! - A success resets the failure counter
//! - Health is advisory; routing does not consult it

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Unchanged,
    BecameHealthy,
    BecameUnhealthy,
}

/// Fold one probe result into `healthy` and `failures`.
pub fn apply_probe(healthy: &mut bool, failures: &mut u32, success: bool, threshold: u32) -> HealthTransition {
    if success {
        *failures = 0;
        if *healthy {
            return HealthTransition::Unchanged;
        }
        *healthy = true;
        return HealthTransition::BecameHealthy;
    }

    *failures = failures.saturating_add(1);
    if *healthy && *failures >= threshold.max(1) {
        *healthy = false;
        return HealthTransition::BecameUnhealthy;
    }
    HealthTransition::Unchanged
}
