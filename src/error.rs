//! Top-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum GuardianError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid WAF rule: {0}")]
    WafRule(#[from] regex::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("failed to bind listener `{name}` on {address}: {source}")]
    Bind {
        name: String,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener `{0}` has no usable route table")]
    UnroutableListener(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
