//! In-memory store with optional JSON persistence.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use super::{unix_millis, ListOptions, Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredValue {
    value: Value,
    expires_at_ms: Option<u64>,
}

impl StoredValue {
    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(at) if at <= now_ms)
    }
}

/// A thread-safe key/value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    persistence_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            entries: DashMap::new(),
            persistence_path,
        }
    }

    /// Load from file if it exists; a missing file yields an empty store.
    pub fn load_from_file(path: &Path) -> Result<Self, StoreError> {
        let store = Self::new(Some(path.to_path_buf()));
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let map: HashMap<String, StoredValue> = serde_json::from_reader(reader)?;
            let now = unix_millis();
            for (key, value) in map.into_iter().filter(|(_, v)| !v.is_expired(now)) {
                store.entries.insert(key, value);
            }
            tracing::info!(path = %path.display(), entries = store.entries.len(), "Loaded storage snapshot");
        }
        Ok(store)
    }

    /// Write a snapshot of all live entries. No-op without a persistence path.
    pub fn save_to_file(&self) -> Result<(), StoreError> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        let now = unix_millis();
        let map: HashMap<_, _> = self
            .entries
            .iter()
            .filter(|r| !r.value().is_expired(now))
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let tmp = path.with_extension("tmp");
        serde_json::to_writer(BufWriter::new(File::create(&tmp)?), &map)?;
        std::fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), entries = map.len(), "Saved storage snapshot");
        Ok(())
    }

    /// Number of stored keys, including expired ones not yet collected.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = unix_millis();
        let before = self.entries.len();
        self.entries.retain(|_, v| !v.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Periodically purge and flush until shutdown, then flush once more.
    pub async fn run_flusher(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.purge_expired();
                    if let Err(e) = self.save_to_file() {
                        tracing::warn!(error = %e, "Storage flush failed");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        if let Err(e) = self.save_to_file() {
            tracing::warn!(error = %e, "Final storage flush failed");
        }
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let now = unix_millis();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, v| v.is_expired(now));
        Ok(None)
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at_ms = ttl.map(|ttl| unix_millis() + ttl.as_millis() as u64);
        self.entries
            .insert(key.to_string(), StoredValue { value, expires_at_ms });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str, options: ListOptions) -> Result<Vec<(String, Value)>, StoreError> {
        let now = unix_millis();
        let mut items: Vec<(String, Value)> = self
            .entries
            .iter()
            .filter(|r| r.key().starts_with(prefix) && !r.value().is_expired(now))
            .map(|r| (r.key().clone(), r.value().value.clone()))
            .collect();

        items.sort_by(|a, b| a.0.cmp(&b.0));
        if options.reverse {
            items.reverse();
        }
        if let Some(limit) = options.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    fn incr(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let now = unix_millis();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue {
                value: Value::from(0),
                expires_at_ms: None,
            });
        if entry.is_expired(now) {
            *entry = StoredValue {
                value: Value::from(0),
                expires_at_ms: None,
            };
        }
        let current = entry
            .value
            .as_i64()
            .ok_or_else(|| StoreError::NotNumeric(key.to_string()))?;
        let next = current + by;
        entry.value = Value::from(next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_set_delete() {
        let store = MemoryStore::new(None);
        assert!(store.get("a").unwrap().is_none());

        store.set("a", json!({"x": 1}), None).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!({"x": 1})));

        store.delete("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
    }

    #[test]
    fn expired_values_disappear() {
        let store = MemoryStore::new(None);
        store.set("short", json!(1), Some(Duration::from_millis(0))).unwrap();
        store.set("long", json!(2), Some(Duration::from_secs(60))).unwrap();

        assert!(store.get("short").unwrap().is_none());
        assert_eq!(store.get("long").unwrap(), Some(json!(2)));
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn list_by_prefix_respects_order_and_limit() {
        let store = MemoryStore::new(None);
        for i in 0..5 {
            store.set(&format!("ev:{i}"), json!(i), None).unwrap();
        }
        store.set("other", json!("x"), None).unwrap();

        let all = store.list("ev:", ListOptions::default()).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].0, "ev:0");

        let latest = store.list("ev:", ListOptions::latest(2)).unwrap();
        assert_eq!(latest, vec![("ev:4".to_string(), json!(4)), ("ev:3".to_string(), json!(3))]);
    }

    #[test]
    fn incr_is_cumulative_and_rejects_non_numbers() {
        let store = MemoryStore::new(None);
        assert_eq!(store.incr("hits", 1).unwrap(), 1);
        assert_eq!(store.incr("hits", 4).unwrap(), 5);

        store.set("name", json!("guardian"), None).unwrap();
        assert!(matches!(store.incr("name", 1), Err(StoreError::NotNumeric(_))));
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = MemoryStore::new(Some(path.clone()));
        store.set("ban:10.0.0.1", json!({"reason": "honeypot"}), None).unwrap();
        store.set("gone", json!(1), Some(Duration::from_millis(0))).unwrap();
        store.save_to_file().unwrap();

        let reloaded = MemoryStore::load_from_file(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("ban:10.0.0.1").unwrap().is_some());
    }
}
