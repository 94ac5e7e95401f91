//! Result cache for idempotent tool calls
//!
//! Entries expire after a TTL chosen by [`CachePolicy`]. Keys are derived
//! from the provider, the tool, and a digest of the canonicalized arguments,
//! so two argument objects with the same content always share a key.
//!
//! Time comes from `tokio::time::Instant`, which lets tests pause and
//! advance the clock.

use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::config::GlobalSettings;

/// TTL for search-like tools
pub const SHORT_TTL: Duration = Duration::from_secs(5 * 60);

/// TTL for every other cacheable tool
pub const LONG_TTL: Duration = Duration::from_secs(30 * 60);

/// Tools cached when the config does not override the allow-list
pub const DEFAULT_CACHEABLE_TOOLS: &[&str] = &[
    "search_europe_pmc",
    "search_arxiv_papers",
    "get_article_details",
    "get_similar_articles",
];

/// Name fragments that put a tool in the short TTL class
const SHORT_TTL_PATTERNS: &[&str] = &["search"];

/// A cached call result
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: Value,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// Concurrent expiring key/value store
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a fresh entry; an expired one is evicted and reported as a miss
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();

        // The map guard must be released before `remove_if` touches the same shard
        let fresh = match self.entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.response.clone()),
            Some(_) => None,
            None => return None,
        };

        if fresh.is_some() {
            tracing::debug!("Cache hit: {}", key);
            return fresh;
        }

        if self
            .entries
            .remove_if(key, |_, entry| !entry.is_fresh(now))
            .is_some()
        {
            tracing::debug!("Cache entry expired: {}", key);
        }
        None
    }

    /// Insert or overwrite an entry, stamped with the current time
    pub fn set(&self, key: impl Into<String>, response: Value, ttl: Duration) {
        let key = key.into();
        tracing::debug!("Cache set: {} (ttl {:?})", key, ttl);
        self.entries.insert(
            key,
            CacheEntry {
                response,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Derive the cache key for a call: `provider.tool:sha256(canonical args)`
pub fn cache_key(provider: &str, tool: &str, arguments: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(arguments, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{}.{}:{}", provider, tool, hex::encode(digest))
}

/// Serialize `value` as JSON with object keys sorted at every depth
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Which tools are cached, and for how long
#[derive(Debug, Clone)]
pub struct CachePolicy {
    cacheable: HashSet<String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CACHEABLE_TOOLS.iter().copied())
    }
}

impl CachePolicy {
    /// Policy caching exactly the given tool names
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cacheable: tools.into_iter().map(Into::into).collect(),
        }
    }

    /// Allow-list from `globalSettings.cacheableTools`, or the built-in list
    pub fn from_settings(settings: &GlobalSettings) -> Self {
        match &settings.cacheable_tools {
            Some(tools) => Self::new(tools.iter().cloned()),
            None => Self::default(),
        }
    }

    pub fn is_cacheable(&self, tool: &str) -> bool {
        self.cacheable.contains(tool)
    }

    /// TTL for a tool, or `None` when its calls bypass the cache
    pub fn ttl_for(&self, tool: &str) -> Option<Duration> {
        if !self.is_cacheable(tool) {
            return None;
        }
        if SHORT_TTL_PATTERNS.iter().any(|p| tool.contains(p)) {
            Some(SHORT_TTL)
        } else {
            Some(LONG_TTL)
        }
    }
}
