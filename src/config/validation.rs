//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (listeners and routes reference existing services)
//! - Validate value ranges (capacities and timeouts > 0, ports valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardianConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GuardianConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no listeners configured")]
    NoListeners,

    #[error("duplicate service name `{0}`")]
    DuplicateService(String),

    #[error("service `{0}` must have a non-zero internal port")]
    InvalidPort(String),

    #[error("services `{0}` and `{1}` share internal port {2}")]
    SharedPort(String, String, u16),

    #[error("service `{0}` has an empty command")]
    EmptyCommand(String),

    #[error("listener `{listener}` references unknown service `{service}`")]
    UnknownService { listener: String, service: String },

    #[error("listener `{0}` has invalid bind address `{1}`")]
    InvalidBindAddress(String, String),

    #[error("bind address `{0}` is used by more than one listener")]
    DuplicateBindAddress(String),

    #[error("route prefix `{0}` must start with '/'")]
    InvalidRoutePrefix(String),

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &GuardianConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut names = HashSet::new();
    let mut ports: Vec<(&str, u16)> = Vec::new();
    for service in &config.services {
        if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if service.internal_port == 0 {
            errors.push(ValidationError::InvalidPort(service.name.clone()));
        } else if let Some((other, _)) = ports.iter().find(|(_, p)| *p == service.internal_port) {
            errors.push(ValidationError::SharedPort(
                other.to_string(),
                service.name.clone(),
                service.internal_port,
            ));
        } else {
            ports.push((&service.name, service.internal_port));
        }
        if matches!(&service.command, Some(cmd) if cmd.trim().is_empty()) {
            errors.push(ValidationError::EmptyCommand(service.name.clone()));
        }
    }

    if config.listeners.is_empty() {
        errors.push(ValidationError::NoListeners);
    }

    let mut binds = HashSet::new();
    for listener in &config.listeners {
        if listener.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidBindAddress(
                listener.name.clone(),
                listener.bind_address.clone(),
            ));
        } else if !binds.insert(listener.bind_address.as_str()) && !listener.bind_address.ends_with(":0") {
            errors.push(ValidationError::DuplicateBindAddress(listener.bind_address.clone()));
        }

        let referenced = std::iter::once(&listener.service)
            .chain(listener.routes.iter().map(|r| &r.service));
        for service in referenced {
            if !names.contains(service.as_str()) {
                errors.push(ValidationError::UnknownService {
                    listener: listener.name.clone(),
                    service: service.clone(),
                });
            }
        }

        for route in &listener.routes {
            if !route.path_prefix.starts_with('/') {
                errors.push(ValidationError::InvalidRoutePrefix(route.path_prefix.clone()));
            }
        }
    }

    if config.rate_limit.enabled {
        if config.rate_limit.capacity < 1.0 {
            errors.push(ValidationError::NotPositive("rate_limit.capacity"));
        }
        if config.rate_limit.fill_rate <= 0.0 {
            errors.push(ValidationError::NotPositive("rate_limit.fill_rate"));
        }
    }
    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::NotPositive("circuit_breaker.failure_threshold"));
    }
    if config.proxy.upstream_timeout_secs == 0 {
        errors.push(ValidationError::NotPositive("proxy.upstream_timeout_secs"));
    }
    if config.supervisor.log_buffer_lines == 0 {
        errors.push(ValidationError::NotPositive("supervisor.log_buffer_lines"));
    }
    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push(ValidationError::NotPositive("health_check.interval_secs"));
    }
    if config.supervisor.sample_interval_secs == 0 {
        errors.push(ValidationError::NotPositive("supervisor.sample_interval_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
