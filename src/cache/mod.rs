//! Response cache for static assets.
//!
//! # Data Flow
//! ```text
//! GET on an allow-listed path
//!     → lookup by service + method + path + query
//!     → hit: stored status/headers/body, `x-cache: HIT`, chain ends
//!     → miss: proceed, then tee a 200 body into the cache while it streams
//! ```
//!
//! # Design Decisions
//! - One cache serves every listener; keys carry the target service so
//!   identical paths on different services never collide
//! - Global byte budget; entries larger than `max_entry_bytes` are never stored
//! - Time-based eviction only, performed lazily on lookup and when making room
//! - The caller's body is never delayed by caching: the copy is built as the
//!   caller consumes it and stored when the stream ends

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::observability::metrics;
use crate::pipeline::{BoxError, Context, Next, Stage};
use crate::security::headers::strip_hop_by_hop;

/// Cache outcome recorded in the request scratch map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Bypass => "bypass",
        }
    }
}

/// A stored response.
#[derive(Debug)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub expires_at: Instant,
    pub size_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    fn to_response(&self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Size and TTL bounded response store.
pub struct ResponseCache {
    entries: DashMap<String, Arc<CacheEntry>>,
    bytes: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    ttl: Duration,
    max_bytes: usize,
    max_entry_bytes: usize,
    path_prefixes: Vec<String>,
    path_suffixes: Vec<String>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            bytes: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            ttl: Duration::from_secs(config.ttl_secs),
            max_bytes: config.max_bytes,
            max_entry_bytes: config.max_entry_bytes,
            path_prefixes: config.path_prefixes.clone(),
            path_suffixes: config.path_suffixes.iter().map(|s| s.to_ascii_lowercase()).collect(),
        }
    }

    pub fn key_for(service: &str, method: &Method, path: &str, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{service}:{method}:{path}?{q}"),
            _ => format!("{service}:{method}:{path}"),
        }
    }

    /// Only GETs on allow-listed prefixes or suffixes are cached.
    pub fn is_cacheable(&self, method: &Method, path: &str) -> bool {
        if method != Method::GET {
            return false;
        }
        let lower = path.to_ascii_lowercase();
        self.path_prefixes.iter().any(|p| path.starts_with(p.as_str()))
            || self.path_suffixes.iter().any(|s| lower.ends_with(s.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.get(key).map(|e| e.clone());
        match entry {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                if let Some((_, old)) = self.entries.remove_if(key, |_, e| e.is_expired(now)) {
                    self.bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a response. Returns false when it does not fit.
    pub fn insert(&self, key: String, status: StatusCode, headers: HeaderMap, body: Bytes) -> bool {
        self.insert_at(key, status, headers, body, Instant::now())
    }

    pub fn insert_at(
        &self,
        key: String,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        now: Instant,
    ) -> bool {
        let header_bytes: usize = headers
            .iter()
            .map(|(k, v)| k.as_str().len() + v.len())
            .sum();
        let size_bytes = body.len() + header_bytes + key.len();
        if body.len() > self.max_entry_bytes {
            return false;
        }

        let replaced = self.entries.get(&key).map(|e| e.size_bytes).unwrap_or(0);
        let needed = |cache: &Self| cache.bytes.load(Ordering::Relaxed).saturating_sub(replaced) + size_bytes;
        if needed(self) > self.max_bytes {
            self.purge_expired_at(now);
            if needed(self) > self.max_bytes {
                tracing::debug!(key = %key, size_bytes, "Cache budget exhausted");
                return false;
            }
        }

        let entry = Arc::new(CacheEntry {
            status,
            headers,
            body,
            expires_at: now + self.ttl,
            size_bytes,
        });
        if let Some(old) = self.entries.insert(key, entry) {
            self.bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
        }
        self.bytes.fetch_add(size_bytes, Ordering::Relaxed);
        true
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                self.bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                purged += 1;
                false
            } else {
                true
            }
        });
        purged
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            bytes: self.bytes.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// True when a response may be stored.
fn is_storable(response: &Response<Body>, max_entry_bytes: usize) -> bool {
    if response.status() != StatusCode::OK || response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }
    let forbidden = response
        .headers()
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| {
            let v = v.to_ascii_lowercase();
            v.contains("no-store") || v.contains("private")
        });
    let too_large = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .is_some_and(|len| len > max_entry_bytes);
    !forbidden && !too_large
}

struct Tee {
    stream: axum::body::BodyDataStream,
    buffer: Option<BytesMut>,
    key: String,
    status: StatusCode,
    headers: HeaderMap,
    cache: Arc<ResponseCache>,
}

/// Wrap a response body so a copy lands in the cache once fully streamed.
fn tee_into_cache(cache: Arc<ResponseCache>, key: String, response: Response<Body>) -> Response<Body> {
    let (parts, body) = response.into_parts();
    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers);

    let limit = cache.max_entry_bytes;
    let state = Tee {
        stream: body.into_data_stream(),
        buffer: Some(BytesMut::new()),
        key,
        status: parts.status,
        headers,
        cache,
    };

    let stream = futures_util::stream::unfold(state, move |mut tee| async move {
        match tee.stream.next().await {
            Some(Ok(chunk)) => {
                let overflow = tee
                    .buffer
                    .as_ref()
                    .is_some_and(|b| b.len() + chunk.len() > limit);
                if overflow {
                    tee.buffer = None;
                } else if let Some(buffer) = tee.buffer.as_mut() {
                    buffer.extend_from_slice(&chunk);
                }
                Some((Ok(chunk), tee))
            }
            Some(Err(e)) => {
                tee.buffer = None;
                Some((Err(e), tee))
            }
            None => {
                if let Some(buffer) = tee.buffer.take() {
                    let stored = tee.cache.insert(
                        std::mem::take(&mut tee.key),
                        tee.status,
                        std::mem::take(&mut tee.headers),
                        buffer.freeze(),
                    );
                    tracing::trace!(stored, "Cache fill finished");
                }
                None
            }
        }
    });

    Response::from_parts(parts, Body::from_stream(stream))
}

/// Serves cached assets and fills the cache from upstream responses.
pub struct CacheStage {
    cache: Arc<ResponseCache>,
}

impl CacheStage {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }
}

impl Stage for CacheStage {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            let method = ctx.request.method().clone();
            if ctx.is_upgrade() || !self.cache.is_cacheable(&method, ctx.path()) {
                ctx.scratch.insert(CacheStatus::Bypass);
                next.run(ctx).await?;
                return Ok(());
            }

            let key = ResponseCache::key_for(&ctx.service, &method, ctx.path(), ctx.query());
            if let Some(entry) = self.cache.get(&key) {
                tracing::debug!(request_id = %ctx.request_id, key = %key, "Cache hit");
                metrics::record_cache(true);
                ctx.scratch.insert(CacheStatus::Hit);
                ctx.respond_with(entry.to_response());
                ctx.set_response_header(
                    header::HeaderName::from_static("x-cache"),
                    HeaderValue::from_static("HIT"),
                );
                return Ok(());
            }

            metrics::record_cache(false);
            ctx.scratch.insert(CacheStatus::Miss);
            next.run(ctx).await?;

            if let Some(response) = ctx.response.take() {
                let mut response = if is_storable(&response, self.cache.max_entry_bytes) {
                    tee_into_cache(self.cache.clone(), key, response)
                } else {
                    response
                };
                response
                    .headers_mut()
                    .insert("x-cache", HeaderValue::from_static("MISS"));
                ctx.respond_with(response);
            }
            Ok(())
        })
    }
}
