//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Install logging and the metrics exporter
//!
//! # Design Decisions
//! - Fail fast: any configuration error is fatal
//! - A missing config path runs the built-in development configuration

use std::path::Path;

use crate::config::{load_config, validate_config, ConfigError, GuardianConfig};
use crate::observability::{logging, metrics};

/// Configuration from `path`, or the validated defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<GuardianConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let config = GuardianConfig::default();
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

/// Install the tracing subscriber and, when enabled, the Prometheus exporter.
pub fn init_observability(config: &GuardianConfig) {
    logging::init_tracing(&config.observability);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }
}
