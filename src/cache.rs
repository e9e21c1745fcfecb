//! Short-TTL in-memory cache of parsed feed results, keyed by source URL.
//!
//! Load shedding only, never a correctness boundary: a miss means "parse
//! again", a briefly stale hit is acceptable, and no cache operation can
//! fail. The cache is created once per process and injected into the
//! engine — there is no module-level global.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::model::ParsedFeed;

/// Default freshness window (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    feed: Arc<ParsedFeed>,
    inserted_at: Instant,
}

/// Process-wide TTL cache for parsed feeds.
///
/// `get` returns an entry only while it is younger than the TTL; entries
/// older than twice the TTL are purged opportunistically on the next
/// write. Reads take the shared lock, so concurrent parsers never queue
/// behind each other on hits.
pub struct FeedCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl FeedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached feed for `url`, if present and still within the TTL window.
    pub fn get(&self, url: &str) -> Option<Arc<ParsedFeed>> {
        self.get_at(url, Instant::now())
    }

    /// Store a parse result for `url` and sweep expired entries.
    pub fn put(&self, url: &str, feed: Arc<ParsedFeed>) {
        self.put_at(url, feed, Instant::now());
    }

    fn get_at(&self, url: &str, now: Instant) -> Option<Arc<ParsedFeed>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(url)?;
        if now.duration_since(entry.inserted_at) < self.ttl {
            Some(Arc::clone(&entry.feed))
        } else {
            None
        }
    }

    fn put_at(&self, url: &str, feed: Arc<ParsedFeed>, now: Instant) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(url.to_owned(), CacheEntry { feed, inserted_at: now });

        // Opportunistic sweep: anything older than 2×TTL goes now
        let horizon = self.ttl * 2;
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.inserted_at) <= horizon);
        let swept = before - entries.len();
        if swept > 0 {
            tracing::debug!(swept = swept, remaining = entries.len(), "feed cache sweep");
        }
    }

    /// Number of entries currently held, including expired-but-unswept ones.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FeedCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
