//! Edge cache storage: keys, freshness, and the entry store.
//!
//! Freshness follows the origin's `Cache-Control` directives and falls back to a
//! configured default TTL when the origin sends none. That default is zero out of
//! the box: nothing is cached until an operator chooses a staleness window, either
//! by setting `default_ttl` here or by having the origin send `max-age`.
//!
//! | Origin response                          | Stored for                          |
//! |------------------------------------------|-------------------------------------|
//! | not `200 OK`                             | never                               |
//! | `no-store`, `no-cache` or `private`      | never                               |
//! | `s-maxage=N`                             | `N` seconds (wins over `max-age`)   |
//! | `max-age=N`                              | `N` seconds                         |
//! | no directive                             | `default_ttl`                       |
//!
//! The result is clamped to `[min_ttl, max_ttl]`; a zero TTL is not stored.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::http::{Request, Response, StatusCode};

/// Default number of entries the edge keeps.
pub const DEFAULT_CAPACITY: u64 = 1000;

/// Cache configuration for the edge.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub min_ttl: Duration,
    pub default_ttl: Duration,
    pub max_ttl: Option<Duration>,
    pub capacity: u64,
    /// Request headers whose values become part of the cache key.
    pub vary_headers: Vec<String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            min_ttl: Duration::ZERO,
            default_ttl: Duration::ZERO,
            max_ttl: None,
            capacity: DEFAULT_CAPACITY,
            vary_headers: Vec::new(),
        }
    }
}

impl CachePolicy {
    /// Decides whether and for how long `response` may be stored.
    pub fn freshness(&self, response: &Response) -> Freshness {
        if response.status() != StatusCode::Ok {
            return Freshness::Bypass("status");
        }

        let directives = CacheControl::from_response(response);
        if directives.no_store || directives.no_cache || directives.private {
            return Freshness::Bypass("cache-control");
        }

        let ttl = directives
            .s_maxage
            .or(directives.max_age)
            .map(Duration::from_secs)
            .unwrap_or(self.default_ttl);

        let ttl = ttl.max(self.min_ttl);
        let ttl = match self.max_ttl {
            Some(max) => ttl.min(max),
            None => ttl,
        };

        if ttl.is_zero() {
            Freshness::Bypass("zero ttl")
        } else {
            Freshness::Store(ttl)
        }
    }
}

/// Outcome of [`CachePolicy::freshness`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Store(Duration),
    /// Not stored; carries a short reason for logs.
    Bypass(&'static str),
}

/// The subset of `Cache-Control` the edge honors.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
}

impl CacheControl {
    /// Parses one header value. Unknown directives are ignored, as are
    /// delta-seconds that do not parse.
    pub fn parse(value: &str) -> Self {
        let mut cc = Self::default();
        cc.merge(value);
        cc
    }

    /// Collects every `Cache-Control` header on `response`.
    pub fn from_response(response: &Response) -> Self {
        let mut cc = Self::default();
        for value in response.headers().get_all("cache-control") {
            cc.merge(value);
        }
        cc
    }

    fn merge(&mut self, value: &str) {
        for directive in value.split(',') {
            let directive = directive.trim();
            let (name, arg) = match directive.split_once('=') {
                Some((n, a)) => (n.trim(), Some(a.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "no-store" => self.no_store = true,
                // `no-cache="field"` only restricts fields, not the whole response
                "no-cache" if arg.is_none() => self.no_cache = true,
                "private" if arg.is_none() => self.private = true,
                "max-age" => self.max_age = arg.and_then(|a| a.parse().ok()).or(self.max_age),
                "s-maxage" => self.s_maxage = arg.and_then(|a| a.parse().ok()).or(self.s_maxage),
                _ => {}
            }
        }
    }
}

/// Identity of a cached representation.
///
/// `HEAD` shares the `GET` entry: both are answered from the same stored response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(request: &Request, vary_headers: &[String]) -> Self {
        let mut key = format!("GET {}", request.target());
        for name in vary_headers {
            let value = request.headers().joined(name);
            key.push('\n');
            key.push_str(&name.to_ascii_lowercase());
            key.push(':');
            key.push_str(&value);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A stored response and its freshness lifetime.
#[derive(Debug)]
pub struct CachedResponse {
    response: Response,
    stored_at: Instant,
    ttl: Duration,
}

impl CachedResponse {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }

    /// Whole seconds since the entry was stored.
    pub fn age(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.stored_at).as_secs()
    }

    pub fn response(&self) -> &Response {
        &self.response
    }
}

/// Bounded store of [`CachedResponse`]s.
///
/// Capacity eviction is delegated to `moka`; expiry is per entry and checked on
/// lookup, since every entry carries its own TTL.
#[derive(Clone)]
pub struct ResponseStore {
    entries: moka::future::Cache<CacheKey, Arc<CachedResponse>>,
}

impl ResponseStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: moka::future::Cache::builder()
                .max_capacity(capacity)
                .build(),
        }
    }

    /// Returns the entry for `key` if it is still fresh; a stale entry is evicted.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<CachedResponse>> {
        let entry = self.entries.get(key).await?;
        if entry.is_fresh(Instant::now()) {
            Some(entry)
        } else {
            tracing::debug!(key = %key.as_str(), "evicting stale entry");
            self.entries.invalidate(key).await;
            None
        }
    }

    pub async fn insert(&self, key: CacheKey, response: Response, ttl: Duration) {
        let entry = CachedResponse {
            response,
            stored_at: Instant::now(),
            ttl,
        };
        self.entries.insert(key, Arc::new(entry)).await;
    }
}
