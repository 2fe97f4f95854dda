//! Hostile user agents and honeypot paths.
//!
//! # Responsibilities
//! - Reject scanners identified by their user agent
//! - Ban callers probing paths no legitimate client requests
//!
//! # Design Decisions
//! - Static, lowercase signature lists; matching is substring/prefix only
//! - A honeypot hit bans the caller immediately and for a long time

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;

use crate::config::BotConfig;
use crate::observability::metrics;
use crate::pipeline::{BoxError, Context, Next, Stage};
use crate::security::bans::BanList;

/// User-agent fragments of well-known attack and scanning tools.
pub const HOSTILE_AGENTS: &[&str] = &[
    "sqlmap",
    "nikto",
    "nmap",
    "masscan",
    "zgrab",
    "gobuster",
    "dirbuster",
    "dirb/",
    "wpscan",
    "nuclei",
    "acunetix",
    "nessus",
    "havij",
    "hydra",
    "w3af",
    "openvas",
    "fimap",
    "commix",
];

/// Paths only vulnerability scanners ask for.
pub const HONEYPOT_PATHS: &[&str] = &[
    "/.env",
    "/.git/",
    "/.aws/",
    "/.ssh/",
    "/wp-admin",
    "/wp-login.php",
    "/xmlrpc.php",
    "/phpmyadmin",
    "/config.php",
    "/server-status",
    "/cgi-bin/",
    "/admin.php",
];

/// True when the user agent carries a hostile signature.
pub fn is_hostile_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    HOSTILE_AGENTS.iter().any(|sig| ua.contains(sig))
}

/// True when the path equals or starts with a honeypot entry.
pub fn is_honeypot_path(path: &str) -> bool {
    let path = path.to_ascii_lowercase();
    HONEYPOT_PATHS.iter().any(|p| path.starts_with(p))
}

/// Bot filter stage.
pub struct BotStage {
    bans: Arc<BanList>,
    ban_ttl: Duration,
    extra_agents: Vec<String>,
    extra_honeypots: Vec<String>,
}

impl BotStage {
    pub fn new(bans: Arc<BanList>, config: &BotConfig) -> Self {
        Self {
            bans,
            ban_ttl: Duration::from_secs(config.honeypot_ban_secs),
            extra_agents: config.extra_agents.iter().map(|a| a.to_ascii_lowercase()).collect(),
            extra_honeypots: config
                .extra_honeypots
                .iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
        }
    }

    fn hostile(&self, user_agent: &str) -> bool {
        let ua = user_agent.to_ascii_lowercase();
        is_hostile_agent(&ua) || self.extra_agents.iter().any(|a| ua.contains(a.as_str()))
    }

    fn honeypot(&self, path: &str) -> bool {
        let path = path.to_ascii_lowercase();
        is_honeypot_path(&path) || self.extra_honeypots.iter().any(|p| path.starts_with(p.as_str()))
    }
}

impl Stage for BotStage {
    fn name(&self) -> &'static str {
        "bot-filter"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            if self.hostile(&ctx.user_agent) {
                tracing::warn!(client = %ctx.client_ip, user_agent = %ctx.user_agent, "Hostile user agent rejected");
                metrics::record_blocked("bot");
                ctx.respond(StatusCode::FORBIDDEN, "Forbidden");
                return Ok(());
            }

            let path = ctx.decoded_path();
            if self.honeypot(&path) {
                let reason = format!("honeypot: {path}");
                self.bans.ban(ctx.client_ip, &reason, Some(self.ban_ttl));
                metrics::record_blocked("honeypot");
                ctx.respond(StatusCode::FORBIDDEN, "Forbidden");
                return Ok(());
            }

            next.run(ctx).await?;
            Ok(())
        })
    }
}
