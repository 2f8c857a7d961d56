use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::RwLock;

use lru::LruCache;
use metrics::counter;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::lock::{rw_read, rw_write};
use super::persist;

const SOURCE: &str = "cache::store";

pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// One cached render: exact source text, the image obtained for it, and the
/// moment it was stored. Entries are never mutated; storing the same source
/// again replaces the entry wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source: String,
    pub image: String,
    #[serde(with = "time::serde::rfc3339")]
    pub stored_at: OffsetDateTime,
}

/// Bounded, content-addressed store of rendered diagrams.
///
/// Keyed by exact source text with least-recently-stored eviction: lookups
/// deliberately do not refresh recency, so the entry evicted at capacity is
/// always the oldest store, matching the persisted ordering.
pub struct RenderCache {
    entries: RwLock<LruCache<String, CacheEntry>>,
    persist_path: Option<PathBuf>,
}

impl RenderCache {
    /// Open a cache, loading any persisted entries from `persist_path`.
    ///
    /// Loading is best-effort: a missing, unreadable, or corrupt file yields
    /// an empty cache.
    pub fn open(max_entries: usize, persist_path: Option<PathBuf>) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        let mut entries = LruCache::new(capacity);

        if let Some(path) = persist_path.as_deref() {
            let mut persisted = persist::load_entries(path);
            // Persisted entries are sorted most-recent first; insert oldest
            // first so recency inside the LRU matches stored_at ordering.
            persisted.sort_by_key(|entry| entry.stored_at);
            for entry in persisted {
                entries.put(entry.source.clone(), entry);
            }
        }

        Self {
            entries: RwLock::new(entries),
            persist_path,
        }
    }

    /// In-memory cache with no backing file.
    pub fn in_memory(max_entries: usize) -> Self {
        Self::open(max_entries, None)
    }

    /// Exact-match lookup. Does not refresh recency.
    pub fn lookup(&self, source: &str) -> Option<CacheEntry> {
        let hit = rw_read(&self.entries, SOURCE, "lookup")
            .peek(source)
            .cloned();
        match hit {
            Some(entry) => {
                counter!("plantpad_cache_hit_total").increment(1);
                Some(entry)
            }
            None => {
                counter!("plantpad_cache_miss_total").increment(1);
                None
            }
        }
    }

    /// Insert or overwrite the entry for this exact source text.
    ///
    /// Storing past capacity evicts the least-recently-stored entry. The
    /// updated snapshot is persisted immediately (best-effort).
    pub fn store(&self, source: &str, image: &str) {
        let entry = CacheEntry {
            source: source.to_string(),
            image: image.to_string(),
            stored_at: OffsetDateTime::now_utc(),
        };

        {
            let mut entries = rw_write(&self.entries, SOURCE, "store");
            if let Some((evicted_key, _)) = entries.push(source.to_string(), entry)
                && evicted_key != source
            {
                counter!("plantpad_cache_evict_total").increment(1);
            }
        }

        self.persist_snapshot();
    }

    /// Empty the cache and its persisted backing store.
    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
        if let Some(path) = self.persist_path.as_deref() {
            persist::remove_file(path);
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist_snapshot(&self) {
        let Some(path) = self.persist_path.as_deref() else {
            return;
        };
        // LRU iteration order is most-recently-stored first, which is the
        // persisted format's descending stored_at ordering.
        let snapshot: Vec<CacheEntry> = rw_read(&self.entries, SOURCE, "persist")
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect();
        persist::save_entries(path, &snapshot);
    }
}
