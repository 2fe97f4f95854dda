//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Pipeline (outermost stage):
//!     → traffic.rs (daily counters, optional request traces in storage)
//!
//! Consumers:
//!     → stdout log lines
//!     → Metrics endpoint (Prometheus scrape)
//!     → Dashboard reading storage
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all subsystems
//! - Metrics are cheap (atomic increments)
//! - Trace recording is off by default

pub mod logging;
pub mod metrics;
pub mod traffic;

pub use traffic::{TraceRecord, TrafficRecorder, TrafficStage};
