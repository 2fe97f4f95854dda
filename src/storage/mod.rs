//! Key/value storage used for bans, counters, events and metric history.
//!
//! # Data Flow
//! ```text
//! ban list / WAF / traffic / supervisor
//!     → Store trait (get, set with TTL, delete, list by prefix, incr)
//!     → memory.rs (DashMap, optional JSON snapshot on disk)
//! ```
//!
//! # Design Decisions
//! - Callers treat every storage call as best effort: failures are logged
//!   and swallowed, never surfaced to clients
//! - Values are JSON so the dashboard can read them without schema coupling
//! - Expiry is lazy: expired keys vanish on the next read

pub mod memory;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryStore;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("value at `{0}` is not an integer")]
    NotNumeric(String),
}

/// Options for prefix listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Maximum number of entries returned.
    pub limit: Option<usize>,
    /// Return keys in descending order.
    pub reverse: bool,
}

impl ListOptions {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            reverse: true,
        }
    }
}

/// Storage collaborator interface.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Entries whose key starts with `prefix`, ordered by key.
    fn list(&self, prefix: &str, options: ListOptions) -> Result<Vec<(String, Value)>, StoreError>;

    /// Atomically add `by` to an integer value, creating it at zero.
    fn incr(&self, key: &str, by: i64) -> Result<i64, StoreError>;
}

pub type SharedStore = Arc<dyn Store>;

/// Log a failed storage call and discard the error.
pub fn best_effort<T>(operation: &'static str, result: Result<T, StoreError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(operation, error = %error, "Storage operation failed");
            None
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Current UTC day, used to bucket counters.
pub fn day_bucket() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
