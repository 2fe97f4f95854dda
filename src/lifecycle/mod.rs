//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Logging/metrics → Gateway::start
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → RunningGateway::shutdown
//!
//! Shutdown (shutdown.rs):
//!     Broadcast → listeners drain → timers exit → services stopped → storage flushed
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then registries, then services, listeners last
//! - Ordered shutdown: stop accepting, drain, stop services, flush

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
