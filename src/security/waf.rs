//! Signature-based request inspection.
//!
//! # Responsibilities
//! - Match decoded path, query and small textual bodies against ordered rules
//! - Reject the first match with 403 and persist a block event
//! - Allow the active rule set to be swapped at runtime
//!
//! # Design Decisions
//! - Rules are compiled once; inspection is read-only and lock-free (ArcSwap)
//! - Bodies are inspected only when small and declared by Content-Length
//! - A buffered body is put back so downstream stages see it unchanged

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, StatusCode};
use futures_util::future::BoxFuture;
use percent_encoding::percent_decode_str;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::config::WafConfig;
use crate::observability::metrics;
use crate::pipeline::{BoxError, Context, Next, Stage};
use crate::storage::{best_effort, day_bucket, unix_millis, SharedStore};

/// Part of the request a rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Path,
    Query,
    Body,
}

const ALL: &[Location] = &[Location::Path, Location::Query, Location::Body];
const PARAMS: &[Location] = &[Location::Query, Location::Body];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    SqlInjection,
    CrossSiteScripting,
    PathTraversal,
    CommandInjection,
    RequestForgery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Medium,
    High,
    Critical,
}

/// A compiled inspection rule.
#[derive(Debug, Clone)]
pub struct WafRule {
    pub id: String,
    pub category: Category,
    pub risk: Risk,
    pub locations: Vec<Location>,
    pattern: Regex,
}

impl WafRule {
    /// Compile a rule. Patterns are matched case-insensitively.
    pub fn new(
        id: &str,
        category: Category,
        risk: Risk,
        locations: &[Location],
        pattern: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            id: id.to_string(),
            category,
            risk,
            locations: locations.to_vec(),
            pattern: RegexBuilder::new(pattern).case_insensitive(true).build()?,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// The rule set shipped with the gateway, in evaluation order.
pub fn builtin_rules() -> Result<Vec<WafRule>, regex::Error> {
    use Category::*;
    use Risk::*;

    Ok(vec![
        WafRule::new("sqli-001", SqlInjection, Critical, ALL, r"\bunion\b[\s\S]{0,40}?\bselect\b")?,
        WafRule::new(
            "sqli-002",
            SqlInjection,
            High,
            PARAMS,
            r#"['"]\s*(?:or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+|\bor\s+1\s*=\s*1\b"#,
        )?,
        WafRule::new(
            "sqli-003",
            SqlInjection,
            Critical,
            PARAMS,
            r";\s*(?:drop|delete|insert|update|shutdown|exec)\b|\b(?:sleep|benchmark|pg_sleep)\s*\(|\bwaitfor\s+delay\b",
        )?,
        WafRule::new("xss-001", CrossSiteScripting, High, ALL, r"<\s*/?\s*script\b")?,
        WafRule::new(
            "xss-002",
            CrossSiteScripting,
            High,
            ALL,
            r"javascript\s*:|\bon(?:error|load|click|mouseover|focus|submit|toggle)\s*=",
        )?,
        WafRule::new("lfi-001", PathTraversal, High, ALL, r"\.\.[/\\]")?,
        WafRule::new(
            "lfi-002",
            PathTraversal,
            Critical,
            ALL,
            r"/etc/(?:passwd|shadow|hosts)\b|/proc/self/|\b(?:boot|win)\.ini\b",
        )?,
        WafRule::new(
            "rce-001",
            CommandInjection,
            Critical,
            PARAMS,
            r"(?:;|\||&&)\s*(?:cat|ls|id|whoami|uname|wget|curl|nc|bash|sh|python|perl)\b|\$\([^)]*\)|`[^`]+`",
        )?,
        WafRule::new(
            "ssrf-001",
            RequestForgery,
            High,
            PARAMS,
            r"169\.254\.169\.254|metadata\.google\.internal|\b100\.100\.100\.200\b",
        )?,
    ])
}

/// A rule hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WafMatch {
    pub rule_id: String,
    pub category: Category,
    pub risk: Risk,
    pub location: Location,
}

/// Rule engine with a swappable rule set.
pub struct Waf {
    rules: ArcSwap<Vec<WafRule>>,
}

impl Waf {
    pub fn new(rules: Vec<WafRule>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
        }
    }

    /// Built-in rules minus the disabled ids.
    pub fn with_builtin_rules(disabled: &[String]) -> Result<Self, regex::Error> {
        let rules = builtin_rules()?
            .into_iter()
            .filter(|r| !disabled.contains(&r.id))
            .collect();
        Ok(Self::new(rules))
    }

    /// Install a new rule set for subsequent requests.
    pub fn replace_rules(&self, rules: Vec<WafRule>) {
        tracing::info!(count = rules.len(), "WAF rules replaced");
        self.rules.store(Arc::new(rules));
    }

    pub fn rule_ids(&self) -> Vec<String> {
        self.rules.load().iter().map(|r| r.id.clone()).collect()
    }

    /// First rule matching any of its locations.
    pub fn inspect(&self, path: &str, query: &str, body: Option<&str>) -> Option<WafMatch> {
        let rules = self.rules.load();
        for rule in rules.iter() {
            for &location in &rule.locations {
                let text = match location {
                    Location::Path => path,
                    Location::Query => query,
                    Location::Body => body.unwrap_or_default(),
                };
                if !text.is_empty() && rule.is_match(text) {
                    return Some(WafMatch {
                        rule_id: rule.id.clone(),
                        category: rule.category,
                        risk: rule.risk,
                        location,
                    });
                }
            }
        }
        None
    }
}

/// Persisted record of a blocked request.
#[derive(Debug, Serialize)]
struct WafEvent<'a> {
    #[serde(flatten)]
    hit: &'a WafMatch,
    ip: String,
    path: &'a str,
    request_id: &'a str,
    at_ms: u64,
}

/// Blocks requests matching a WAF rule with 403.
pub struct WafStage {
    waf: Arc<Waf>,
    config: WafConfig,
    store: SharedStore,
}

impl WafStage {
    pub fn new(waf: Arc<Waf>, config: WafConfig, store: SharedStore) -> Self {
        Self { waf, config, store }
    }

    /// Buffer a small textual body, put it back, and return its decoded text.
    async fn take_body_text(&self, ctx: &mut Context) -> Result<Option<String>, axum::Error> {
        let headers = ctx.request.headers();
        let length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match length {
            Some(len) if len > 0 && len <= self.config.max_body_bytes => {}
            _ => return Ok(None),
        }
        let form = content_type.starts_with("application/x-www-form-urlencoded");
        let textual = form
            || content_type.starts_with("text/")
            || content_type.contains("json")
            || content_type.contains("xml");
        if !textual {
            return Ok(None);
        }

        let body = std::mem::take(ctx.request.body_mut());
        let bytes = axum::body::to_bytes(body, self.config.max_body_bytes).await?;
        *ctx.request.body_mut() = Body::from(bytes.clone());

        let text = String::from_utf8_lossy(&bytes);
        Ok(Some(if form {
            percent_decode_str(&text.replace('+', " "))
                .decode_utf8_lossy()
                .into_owned()
        } else {
            text.into_owned()
        }))
    }

    fn record_block(&self, ctx: &Context, hit: &WafMatch) {
        let now = unix_millis();
        let event = WafEvent {
            hit,
            ip: ctx.client_ip.to_string(),
            path: ctx.path(),
            request_id: &ctx.request_id,
            at_ms: now,
        };
        if let Ok(value) = serde_json::to_value(&event) {
            let key = format!("waf:event:{now:013}:{}", uuid::Uuid::new_v4());
            let ttl = Duration::from_secs(self.config.event_ttl_secs);
            best_effort("waf.event", self.store.set(&key, value, Some(ttl)));
        }
        best_effort("waf.counter", self.store.incr(&format!("waf:blocked:{}", day_bucket()), 1));
    }
}

impl Stage for WafStage {
    fn name(&self) -> &'static str {
        "waf"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            let path = if self.config.inspect_path {
                ctx.decoded_path()
            } else {
                String::new()
            };
            let query = if self.config.inspect_query {
                ctx.decoded_query()
            } else {
                String::new()
            };
            let body = if self.config.inspect_body && !ctx.is_upgrade() {
                match self.take_body_text(ctx).await {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::debug!(error = %e, "Unreadable request body");
                        ctx.respond(StatusCode::BAD_REQUEST, "Bad Request");
                        return Ok(());
                    }
                }
            } else {
                None
            };

            if let Some(hit) = self.waf.inspect(&path, &query, body.as_deref()) {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    client = %ctx.client_ip,
                    rule = %hit.rule_id,
                    location = ?hit.location,
                    "Request blocked by WAF"
                );
                metrics::record_blocked("waf");
                self.record_block(ctx, &hit);
                ctx.respond(
                    StatusCode::FORBIDDEN,
                    &format!("Forbidden: Blocked by WAF ({})", hit.rule_id),
                );
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
    use crate::pipeline::context::test_support::{context, context_from};
    use crate::pipeline::Pipeline;
    use crate::storage::{ListOptions, MemoryStore, Store};
    use axum::http::Request;

    fn waf() -> Waf {
        Waf::with_builtin_rules(&[]).unwrap()
    }

    fn rule_for(path: &str, query: &str, body: Option<&str>) -> Option<String> {
        waf().inspect(path, query, body).map(|m| m.rule_id)
    }

    #[test]
    fn builtin_rules_compile_in_order() {
        let ids = waf().rule_ids();
        assert_eq!(ids.first().map(String::as_str), Some("sqli-001"));
        assert_eq!(ids.len(), 9);
    }

    #[test]
    fn detects_common_attacks() {
        assert_eq!(rule_for("/search", "q=1 UNION SELECT password FROM users", None).as_deref(), Some("sqli-001"));
        assert_eq!(rule_for("/login", "user=' or 'a'='a", None).as_deref(), Some("sqli-002"));
        assert_eq!(rule_for("/item", "id=1; DROP TABLE users", None).as_deref(), Some("sqli-003"));
        assert_eq!(rule_for("/c", "text=<script>alert(1)</script>", None).as_deref(), Some("xss-001"));
        assert_eq!(rule_for("/c", "", Some("<img src=x onerror=alert(1)>")).as_deref(), Some("xss-002"));
        assert_eq!(rule_for("/static/../../secret", "", None).as_deref(), Some("lfi-001"));
        assert_eq!(rule_for("/read", "file=/etc/passwd", None).as_deref(), Some("lfi-002"));
        assert_eq!(rule_for("/ping", "host=127.0.0.1; cat /tmp/x", None).as_deref(), Some("rce-001"));
        assert_eq!(rule_for("/fetch", "url=http://169.254.169.254/latest", None).as_deref(), Some("ssrf-001"));
    }

    #[test]
    fn clean_requests_pass() {
        assert!(rule_for("/api/users/42", "page=2&id=7&sort=name", None).is_none());
        assert!(rule_for("/blog/select-the-best-union-jobs", "", None).is_none());
        assert!(rule_for("/", "", Some(r#"{"name":"Ada","role":"admin"}"#)).is_none());
    }

    #[test]
    fn disabled_and_replaced_rules() {
        let waf = Waf::with_builtin_rules(&["lfi-001".to_string()]).unwrap();
        assert!(waf.inspect("/a/../b", "", None).is_none());

        waf.replace_rules(vec![WafRule::new(
            "custom-001",
            Category::RequestForgery,
            Risk::Medium,
            &[Location::Path],
            r"^/internal",
        )
        .unwrap()]);
        assert_eq!(waf.inspect("/INTERNAL/x", "", None).unwrap().rule_id, "custom-001");
        assert_eq!(waf.rule_ids(), vec!["custom-001"]);
    }

    fn stage(store: SharedStore) -> Pipeline {
        Pipeline::builder()
            .stage(WafStage::new(Arc::new(waf()), WafConfig::default(), store))
            .build()
    }

    #[tokio::test]
    async fn blocks_and_records_event() {
        let store: SharedStore = Arc::new(MemoryStore::new(None));
        let pipeline = stage(store.clone());

        let response = pipeline
            .execute(&mut context("GET", "/search?q=union%20select%201"))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Forbidden: Blocked by WAF (sqli-001)");

        let events = store.list("waf:event:", ListOptions::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1["rule_id"], "sqli-001");
        assert_eq!(events[0].1["ip"], "10.1.2.3");
        let counter = store.get(&format!("waf:blocked:{}", day_bucket())).unwrap();
        assert_eq!(counter, Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn encoded_traversal_in_path_is_blocked() {
        let store: SharedStore = Arc::new(MemoryStore::new(None));
        let response = stage(store).execute(&mut context("GET", "/files/%2e%2e%2fsecret")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn inspects_form_body_and_restores_clean_body() {
        let store: SharedStore = Arc::new(MemoryStore::new(None));
        let pipeline = stage(store);

        let hostile = Request::builder()
            .method("POST")
            .uri("/comment")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::CONTENT_LENGTH, "31")
            .body(Body::from("text=%3Cscript%3Ealert(1)%3C%2F"))
            .unwrap();
        let response = pipeline.execute(&mut context_from(hostile)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let clean = Request::builder()
            .method("POST")
            .uri("/comment")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, "13")
            .body(Body::from(r#"{"text":"hi"}"#))
            .unwrap();
        let mut ctx = context_from(clean);
        let response = pipeline.execute(&mut ctx).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = std::mem::take(ctx.request.body_mut());
        let restored = axum::body::to_bytes(body, 1024).await.unwrap();
        assert_eq!(&restored[..], br#"{"text":"hi"}"#);
    }
}
