//! Banned caller registry and its enforcement stage.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::observability::metrics;
use crate::pipeline::{BoxError, Context, Next, Stage};
use crate::storage::{best_effort, unix_millis, ListOptions, SharedStore};

const KEY_PREFIX: &str = "ban:";

/// Why and until when a caller is banned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub reason: String,
    pub banned_at_ms: u64,
    /// `None` bans forever.
    pub expires_at_ms: Option<u64>,
}

impl BanRecord {
    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(at) if at <= now_ms)
    }
}

/// In-memory ban table mirrored to storage under `ban:<ip>`.
pub struct BanList {
    bans: DashMap<IpAddr, BanRecord>,
    store: SharedStore,
}

impl BanList {
    /// Empty ban list backed by `store`.
    pub fn new(store: SharedStore) -> Self {
        Self {
            bans: DashMap::new(),
            store,
        }
    }

    /// Ban list seeded from the bans already persisted in `store`.
    pub fn load(store: SharedStore) -> Self {
        let list = Self::new(store);
        let now = unix_millis();
        let persisted = best_effort("ban.load", list.store.list(KEY_PREFIX, ListOptions::default()))
            .unwrap_or_default();

        for (key, value) in persisted {
            let Some(ip) = key
                .strip_prefix(KEY_PREFIX)
                .and_then(|s| s.parse::<IpAddr>().ok())
            else {
                continue;
            };
            match serde_json::from_value::<BanRecord>(value) {
                Ok(record) if !record.is_expired(now) => {
                    list.bans.insert(ip, record);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping malformed ban record"),
            }
        }
        if !list.bans.is_empty() {
            tracing::info!(count = list.bans.len(), "Loaded persisted bans");
        }
        list
    }

    /// Ban `ip`, replacing any existing ban.
    pub fn ban(&self, ip: IpAddr, reason: &str, ttl: Option<Duration>) -> BanRecord {
        let now = unix_millis();
        let record = BanRecord {
            reason: reason.to_string(),
            banned_at_ms: now,
            expires_at_ms: ttl.map(|t| now + t.as_millis() as u64),
        };
        self.bans.insert(ip, record.clone());

        if let Ok(value) = serde_json::to_value(&record) {
            best_effort("ban.persist", self.store.set(&key(ip), value, ttl));
        }
        tracing::warn!(client = %ip, reason, ttl_secs = ttl.map(|t| t.as_secs()), "Caller banned");
        record
    }

    /// Lift a ban. Returns whether one existed.
    pub fn unban(&self, ip: IpAddr) -> bool {
        let existed = self.bans.remove(&ip).is_some();
        best_effort("ban.delete", self.store.delete(&key(ip)));
        if existed {
            tracing::info!(client = %ip, "Caller unbanned");
        }
        existed
    }

    /// Active ban for `ip`. Expired bans are removed on the way.
    pub fn is_banned(&self, ip: IpAddr) -> Option<BanRecord> {
        let now = unix_millis();
        let record = self.bans.get(&ip)?.clone();
        if record.is_expired(now) {
            self.bans.remove_if(&ip, |_, r| r.is_expired(now));
            return None;
        }
        Some(record)
    }

    /// Every active ban.
    pub fn list(&self) -> Vec<(IpAddr, BanRecord)> {
        let now = unix_millis();
        let mut bans: Vec<_> = self
            .bans
            .iter()
            .filter(|r| !r.value().is_expired(now))
            .map(|r| (*r.key(), r.value().clone()))
            .collect();
        bans.sort_by_key(|(_, r)| r.banned_at_ms);
        bans
    }
}

fn key(ip: IpAddr) -> String {
    format!("{KEY_PREFIX}{ip}")
}

/// Rejects banned callers with 403.
pub struct BanStage {
    bans: Arc<BanList>,
}

impl BanStage {
    pub fn new(bans: Arc<BanList>) -> Self {
        Self { bans }
    }
}

impl Stage for BanStage {
    fn name(&self) -> &'static str {
        "ban-list"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            if let Some(record) = self.bans.is_banned(ctx.client_ip) {
                tracing::debug!(client = %ctx.client_ip, reason = %record.reason, "Rejecting banned caller");
                metrics::record_blocked("banned");
                ctx.respond(StatusCode::FORBIDDEN, "Forbidden");
                return Ok(());
            }
            next.run(ctx).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::test_support::context;
    use crate::pipeline::Pipeline;
    use crate::storage::{MemoryStore, Store};

    fn store() -> SharedStore {
        Arc::new(MemoryStore::new(None))
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn ban_and_unban() {
        let bans = BanList::new(store());
        assert!(bans.is_banned(ip("10.0.0.1")).is_none());

        bans.ban(ip("10.0.0.1"), "manual", None);
        assert_eq!(bans.is_banned(ip("10.0.0.1")).unwrap().reason, "manual");
        assert_eq!(bans.list().len(), 1);

        assert!(bans.unban(ip("10.0.0.1")));
        assert!(!bans.unban(ip("10.0.0.1")));
        assert!(bans.is_banned(ip("10.0.0.1")).is_none());
    }

    #[test]
    fn expired_bans_are_lifted_lazily() {
        let bans = BanList::new(store());
        bans.ban(ip("10.0.0.1"), "short", Some(Duration::ZERO));
        assert!(bans.is_banned(ip("10.0.0.1")).is_none());
        assert!(bans.list().is_empty());
    }

    #[test]
    fn bans_survive_reload_from_store() {
        let store = store();
        BanList::new(store.clone()).ban(ip("10.0.0.9"), "honeypot", Some(Duration::from_secs(60)));
        store.set("ban:garbage", serde_json::json!({"x": 1}), None).unwrap();

        let reloaded = BanList::load(store);
        assert_eq!(reloaded.is_banned(ip("10.0.0.9")).unwrap().reason, "honeypot");
        assert_eq!(reloaded.list().len(), 1);
    }

    #[tokio::test]
    async fn stage_rejects_banned_caller() {
        let bans = Arc::new(BanList::new(store()));
        let pipeline = Pipeline::builder().stage(BanStage::new(bans.clone())).build();

        let allowed = pipeline.execute(&mut context("GET", "/")).await;
        assert_eq!(allowed.status(), StatusCode::NOT_FOUND);

        bans.ban(ip("10.1.2.3"), "manual", None);
        let rejected = pipeline.execute(&mut context("GET", "/")).await;
        assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    }
}
