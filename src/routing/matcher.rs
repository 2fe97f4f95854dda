//! Route matching logic.
//!
//! # Responsibilities
//! - Match path prefixes on segment boundaries
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - `/api` matches `/api` and `/api/users` but not `/apiary`
//! - No regex to guarantee O(n) matching

/// Trait for matching request paths against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the path matches this condition.
    fn matches(&self, path: &str) -> bool;
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher. A trailing slash is ignored.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        Self {
            prefix: trimmed.to_string(),
        }
    }

    /// Prefix length, used to prefer the most specific route.
    pub fn specificity(&self) -> usize {
        self.prefix.len()
    }

    pub fn prefix(&self) -> &str {
        if self.prefix.is_empty() {
            "/"
        } else {
            &self.prefix
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(&self.prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.prefix.is_empty(),
            None => false,
        }
    }
}
