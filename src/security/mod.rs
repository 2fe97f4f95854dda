//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → bans.rs (banned caller → 403)
//!     → rate_limit.rs (per-IP token bucket → 429)
//!     → bot.rs (hostile agents → 403, honeypots → ban + 403)
//!     → waf.rs (signature rules → 403)
//! Outgoing response:
//!     → headers.rs (hardening headers, forwarding headers upstream)
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - No trust in client input

pub mod bans;
pub mod bot;
pub mod headers;
pub mod rate_limit;
pub mod waf;

pub use bans::{BanList, BanRecord, BanStage};
pub use bot::BotStage;
pub use headers::SecurityHeadersStage;
pub use rate_limit::{RateLimitStage, RateLimiter};
pub use waf::{Waf, WafStage};
