//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled per-listener routes
//! - Classify (listener, path) into a target service and internal port
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) path prefix scan (acceptable for typical route counts)
//! - Longest prefix wins; the listener's default service catches the rest

use std::collections::HashMap;

use crate::config::{GuardianConfig, ListenerConfig};
use crate::routing::matcher::{Matcher, PathPrefixMatcher};

/// Where a request is forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub service: String,
    pub internal_port: u16,
}

impl RouteTarget {
    pub fn new(service: impl Into<String>, internal_port: u16) -> Self {
        Self {
            service: service.into(),
            internal_port,
        }
    }
}

/// Compiled routes of one public listener.
#[derive(Debug, Clone)]
pub struct ListenerRoutes {
    pub name: String,
    default: RouteTarget,
    routes: Vec<(PathPrefixMatcher, RouteTarget)>,
}

impl ListenerRoutes {
    /// Compile a listener's routes. `None` when a referenced service is unknown.
    pub fn compile(listener: &ListenerConfig, config: &GuardianConfig) -> Option<Self> {
        let target = |name: &str| {
            config
                .service(name)
                .map(|s| RouteTarget::new(&s.name, s.internal_port))
        };

        let default = target(&listener.service)?;
        let mut routes = listener
            .routes
            .iter()
            .map(|r| Some((PathPrefixMatcher::new(&r.path_prefix), target(&r.service)?)))
            .collect::<Option<Vec<_>>>()?;
        routes.sort_by_key(|(m, _)| std::cmp::Reverse(m.specificity()));

        Some(Self {
            name: listener.name.clone(),
            default,
            routes,
        })
    }

    /// Target for a request path.
    pub fn classify(&self, path: &str) -> &RouteTarget {
        self.routes
            .iter()
            .find(|(m, _)| m.matches(path))
            .map(|(_, t)| t)
            .unwrap_or(&self.default)
    }

    pub fn default_target(&self) -> &RouteTarget {
        &self.default
    }
}

/// Routes of every listener, keyed by listener name.
#[derive(Debug, Clone, Default)]
pub struct Router {
    listeners: HashMap<String, ListenerRoutes>,
}

impl Router {
    /// Compile every listener. Listeners referencing unknown services are skipped
    /// (validation rejects such configs before this point).
    pub fn from_config(config: &GuardianConfig) -> Self {
        let listeners = config
            .listeners
            .iter()
            .filter_map(|l| ListenerRoutes::compile(l, config))
            .map(|r| (r.name.clone(), r))
            .collect();
        Self { listeners }
    }

    pub fn listener(&self, name: &str) -> Option<&ListenerRoutes> {
        self.listeners.get(name)
    }

    /// Classify a request arriving on `listener` with `path`.
    pub fn classify(&self, listener: &str, path: &str) -> Option<&RouteTarget> {
        self.listener(listener).map(|l| l.classify(path))
    }
}
