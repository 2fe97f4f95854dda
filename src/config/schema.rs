//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardianConfig {
    /// Public listeners (frontend, backend, dashboard).
    pub listeners: Vec<ListenerConfig>,

    /// Upstream services, supervised or not.
    pub services: Vec<ServiceConfig>,

    /// Per-IP token bucket settings.
    pub rate_limit: RateLimitConfig,

    /// Per-service circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Signature-based request inspection.
    pub waf: WafConfig,

    /// Hostile user agents and honeypot paths.
    pub bot: BotConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Upstream forwarding, timeouts and retries.
    pub proxy: ProxyConfig,

    /// Process supervisor settings.
    pub supervisor: SupervisorConfig,

    /// Liveness probing of supervised services.
    pub health_check: HealthCheckConfig,

    /// Hardening headers and request limits.
    pub security: SecurityConfig,

    /// Key/value storage settings.
    pub storage: StorageConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            listeners: vec![
                ListenerConfig::new("frontend", "0.0.0.0:3000", "frontend"),
                ListenerConfig::new("backend", "0.0.0.0:8000", "backend"),
                ListenerConfig::new("dashboard", "127.0.0.1:9000", "dashboard"),
            ],
            services: vec![
                ServiceConfig::supervised("frontend", "npm", &["run", "start"], 3002),
                ServiceConfig::supervised("backend", "npm", &["run", "start"], 8002),
                ServiceConfig::external("dashboard", 9002),
            ],
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            waf: WafConfig::default(),
            bot: BotConfig::default(),
            cache: CacheConfig::default(),
            proxy: ProxyConfig::default(),
            supervisor: SupervisorConfig::default(),
            health_check: HealthCheckConfig::default(),
            security: SecurityConfig::default(),
            storage: StorageConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl GuardianConfig {
    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// A public listener and the services reachable through it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Listener identifier for logging.
    pub name: String,

    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Service receiving traffic that matches no path route.
    pub service: String,

    /// Path prefixes diverted to other services (e.g., "/api" → backend).
    #[serde(default)]
    pub routes: Vec<PathRouteConfig>,
}

impl ListenerConfig {
    pub fn new(name: &str, bind_address: &str, service: &str) -> Self {
        Self {
            name: name.to_string(),
            bind_address: bind_address.to_string(),
            service: service.to_string(),
            routes: Vec::new(),
        }
    }
}

/// Path prefix override within a listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathRouteConfig {
    /// Path prefix to match (segment aware).
    pub path_prefix: String,

    /// Service to forward matching requests to.
    pub service: String,
}

/// Upstream service definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique service name.
    pub name: String,

    /// Program to spawn. Services without a command are routed but not supervised.
    #[serde(default)]
    pub command: Option<String>,

    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides merged over the gateway's environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Loopback port the service listens on.
    pub internal_port: u16,

    /// Restart the process after unexpected exits.
    #[serde(default = "default_true")]
    pub auto_restart: bool,

    /// Path used by liveness probes.
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl ServiceConfig {
    pub fn supervised(name: &str, command: &str, args: &[&str], internal_port: u16) -> Self {
        Self {
            name: name.to_string(),
            command: Some(command.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            working_dir: None,
            internal_port,
            auto_restart: true,
            health_path: default_health_path(),
        }
    }

    pub fn external(name: &str, internal_port: u16) -> Self {
        Self {
            name: name.to_string(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            internal_port,
            auto_restart: false,
            health_path: default_health_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_health_path() -> String {
    "/".to_string()
}

/// Token bucket configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Bucket capacity (burst size).
    pub capacity: f64,

    /// Tokens added per second.
    pub fill_rate: f64,

    /// Buckets idle longer than this are purged.
    pub idle_ttl_secs: u64,

    /// Minimum time between idle sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 100.0,
            fill_rate: 10.0,
            idle_ttl_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the breaker stage.
    pub enabled: bool,

    /// Consecutive failures before opening.
    pub failure_threshold: u32,

    /// Seconds to stay open before allowing a trial.
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            cooldown_secs: 30,
        }
    }
}

/// WAF configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WafConfig {
    /// Enable the WAF stage.
    pub enabled: bool,

    /// Inspect the decoded path.
    pub inspect_path: bool,

    /// Inspect the decoded query string.
    pub inspect_query: bool,

    /// Inspect small textual request bodies.
    pub inspect_body: bool,

    /// Largest body (by Content-Length) that is buffered for inspection.
    pub max_body_bytes: usize,

    /// Built-in rule ids to skip.
    pub disabled_rules: Vec<String>,

    /// How long block events are kept in storage.
    pub event_ttl_secs: u64,
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inspect_path: true,
            inspect_query: true,
            inspect_body: true,
            max_body_bytes: 16 * 1024,
            disabled_rules: Vec::new(),
            event_ttl_secs: 7 * 24 * 3600,
        }
    }
}

/// Bot and honeypot configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BotConfig {
    /// Enable the bot filter stage.
    pub enabled: bool,

    /// Ban duration applied to honeypot visitors.
    pub honeypot_ban_secs: u64,

    /// Additional user-agent substrings to reject.
    pub extra_agents: Vec<String>,

    /// Additional honeypot path prefixes.
    pub extra_honeypots: Vec<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            honeypot_ban_secs: 7 * 24 * 3600,
            extra_agents: Vec::new(),
            extra_honeypots: Vec::new(),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the cache stage.
    pub enabled: bool,

    /// Entry lifetime in seconds.
    pub ttl_secs: u64,

    /// Global byte budget across all entries.
    pub max_bytes: usize,

    /// Largest single body that is cached.
    pub max_entry_bytes: usize,

    /// Cacheable path prefixes.
    pub path_prefixes: Vec<String>,

    /// Cacheable path suffixes (file extensions).
    pub path_suffixes: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            max_bytes: 64 * 1024 * 1024,
            max_entry_bytes: 4 * 1024 * 1024,
            path_prefixes: vec![
                "/static/".to_string(),
                "/assets/".to_string(),
                "/_next/static/".to_string(),
            ],
            path_suffixes: [
                ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Upstream forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Host upstream services listen on.
    pub upstream_host: String,

    /// Deadline for a single upstream attempt in seconds.
    pub upstream_timeout_secs: u64,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Extra attempts for idempotent requests after connection failures.
    pub max_retries: u32,

    /// Linear backoff step in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Largest idempotent request body buffered for replay.
    pub max_buffered_body_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_host: "127.0.0.1".to_string(),
            upstream_timeout_secs: 30,
            connect_timeout_ms: 2_000,
            max_retries: 2,
            retry_base_delay_ms: 100,
            max_buffered_body_bytes: 1024 * 1024,
        }
    }
}

/// Process supervisor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Enable process supervision.
    pub enabled: bool,

    /// Start every supervised service at boot.
    pub autostart: bool,

    /// Fixed delay before restarting a crashed or restarted service.
    pub restart_delay_ms: u64,

    /// Time a fresh process must stay alive before it counts as running.
    pub ready_grace_ms: u64,

    /// Time between SIGTERM and a forced kill.
    pub stop_grace_ms: u64,

    /// Lines kept per service in the log ring buffer.
    pub log_buffer_lines: usize,

    /// Forward captured log lines to storage.
    pub persist_logs: bool,

    /// Retention of persisted log lines.
    pub log_ttl_secs: u64,

    /// Resource sampling interval.
    pub sample_interval_secs: u64,

    /// Minimum time between persisted resource snapshots.
    pub persist_interval_secs: u64,

    /// Retention of persisted resource snapshots.
    pub metrics_ttl_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            autostart: true,
            restart_delay_ms: 2_000,
            ready_grace_ms: 500,
            stop_grace_ms: 5_000,
            log_buffer_lines: 500,
            persist_logs: true,
            log_ttl_secs: 24 * 3600,
            sample_interval_secs: 5,
            persist_interval_secs: 60,
            metrics_ttl_secs: 24 * 3600,
        }
    }
}

/// Liveness probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable liveness probes.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            unhealthy_threshold: 3,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Add hardening response headers.
    pub enable_headers: bool,

    /// Include Strict-Transport-Security.
    pub hsts: bool,

    /// Content-Security-Policy applied when the upstream sets none.
    pub content_security_policy: String,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// Take the caller IP from X-Forwarded-For (only behind a trusted proxy).
    pub trust_forwarded_for: bool,

    /// Reject banned callers.
    pub enforce_bans: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            hsts: true,
            content_security_policy: "default-src 'self'".to_string(),
            max_body_size: 10 * 1024 * 1024,
            trust_forwarded_for: false,
            enforce_bans: true,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot file. In-memory only when unset.
    pub path: Option<PathBuf>,

    /// Seconds between snapshot flushes.
    pub flush_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            flush_interval_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Count requests per day and service in storage.
    pub traffic_accounting: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Record per-request traces into storage at boot.
    pub trace_recording: bool,

    /// Retention of recorded traces.
    pub trace_ttl_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            traffic_accounting: true,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
            trace_recording: false,
            trace_ttl_secs: 3600,
        }
    }
}
