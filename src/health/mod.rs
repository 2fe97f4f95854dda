//! Liveness checking of supervised services.
//!
//! # Data Flow
//! ```text
//! Periodic timer (active.rs)
//!     → GET health_path on each running service
//!     → state.rs folds the result into the runtime table
//! ```
//!
//! # Design Decisions
//! - Probes are advisory: they feed the dashboard and metrics, not routing
//! - Only services in the Running state are probed

pub mod active;
pub mod state;

pub use active::HealthProber;
