//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (listener, path)
//!     → router.rs (listener lookup)
//!     → matcher.rs (segment-aware path prefixes)
//!     → Return: RouteTarget { service, internal_port }
//!
//! Route Compilation (at startup):
//!     ListenerConfig[]
//!     → Resolve service names to internal ports
//!     → Sort path routes by specificity
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use router::{ListenerRoutes, RouteTarget, Router};
