//! Process supervision subsystem.
//!
//! # Data Flow
//! ```text
//! ServiceManager::start
//!     → spawn (env + PORT) → Starting → Running after the ready grace
//!     → stdout/stderr lines → ring buffer, storage, broadcast subscribers
//!     → exit watcher → Stopped (requested) or Crashed → restart after delay
//!
//! Timers:
//!     resources.rs (CPU/memory per pid, persisted snapshots)
//!     health::HealthProber (liveness probes, advisory)
//! ```
//!
//! # Design Decisions
//! - Runtime state lives in one DashMap keyed by service name
//! - Crash restarts are unbounded at a fixed delay
//! - Services without a command are routed but never supervised

pub mod logs;
pub mod manager;
pub mod resources;
pub mod service;

pub use logs::{LogLine, LogStream};
pub use manager::{ServiceManager, SupervisorError};
pub use resources::{ResourceSample, ResourceSampler};
pub use service::{ServiceInfo, ServiceRuntime, ServiceStatus};
