//! Process-wide in-memory cache for fetched documents and embeddings.
//!
//! The cache is keyed by content fingerprint (`fetch:<url>` for documents,
//! `embed:<model>:<chunk-hash>` for vectors) and bounded by both a byte
//! budget and an entry cap; least-recently-used entries are evicted when
//! either bound is exceeded. Every entry carries its own TTL and expires
//! lazily on lookup.
//!
//! The cache is never the source of truth: it exists to avoid repeated
//! network and embedding-API cost, and a process restart clears it
//! entirely. The store is the only durable layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::config::CacheConfig;
use crate::types::{PipelineError, SourceDocument};

/// Value stored in the cache: either a fetched document or a computed
/// embedding vector.
#[derive(Clone, Debug)]
pub enum CachePayload {
    Document(SourceDocument),
    Vector(Vec<f32>),
}

impl CachePayload {
    /// Approximate heap footprint used against the byte budget.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        match self {
            CachePayload::Document(doc) => {
                doc.raw_text.len() + doc.url.len() + doc.content_hash.len()
            }
            CachePayload::Vector(vector) => vector.len() * std::mem::size_of::<f32>(),
        }
    }
}

/// Result of a cache-or-compute lookup, indicating whether the payload was
/// served from the cache.
#[derive(Clone, Debug)]
pub struct Lookup {
    pub payload: CachePayload,
    pub from_cache: bool,
}

struct Entry {
    payload: CachePayload,
    inserted_at: Instant,
    ttl: Duration,
    size_bytes: usize,
    last_used: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    total_bytes: usize,
    tick: u64,
}

/// Counters exposed for observability; cache hits at the fetch layer are
/// the primary cost-saving signal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Thread-safe TTL + LRU cache bounded by bytes and entry count.
///
/// Reads and writes are serialized behind a single mutex; payloads are
/// cloned out so no partially-written value is ever observable.
pub struct MemoryCache {
    inner: Mutex<Inner>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl MemoryCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Looks up `key`, treating an expired entry as a miss and removing it.
    pub fn get(&self, key: &str) -> Option<CachePayload> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                let removed = inner
                    .entries
                    .remove(key)
                    .map(|entry| entry.size_bytes)
                    .unwrap_or(0);
                inner.total_bytes -= removed;
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(_) => {
                inner.tick += 1;
                let tick = inner.tick;
                let entry = inner
                    .entries
                    .get_mut(key)
                    .map(|entry| {
                        entry.last_used = tick;
                        entry.payload.clone()
                    });
                self.hits.fetch_add(1, Ordering::Relaxed);
                entry
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts `payload` under `key` with its own TTL, then evicts
    /// least-recently-used entries until both bounds hold again.
    pub fn put(&self, key: impl Into<String>, payload: CachePayload, ttl: Duration) {
        let key = key.into();
        let size_bytes = payload.size_bytes();
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let entry = Entry {
            payload,
            inserted_at: Instant::now(),
            ttl,
            size_bytes,
            last_used: inner.tick,
        };
        if let Some(previous) = inner.entries.insert(key, entry) {
            inner.total_bytes -= previous.size_bytes;
        }
        inner.total_bytes += size_bytes;
        self.evict_locked(&mut inner);
    }

    /// The cache-or-compute memoization shared by the fetch and embed
    /// layers: returns a cached payload when fresh, otherwise runs
    /// `compute` and stores its result under `key`.
    ///
    /// Concurrent callers computing the same key may duplicate work; the
    /// pipeline serializes per-URL ingests above this layer, so duplicate
    /// computes only occur across unrelated keys.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Lookup, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachePayload, PipelineError>>,
    {
        if let Some(payload) = self.get(key) {
            trace!(key, "cache hit");
            return Ok(Lookup {
                payload,
                from_cache: true,
            });
        }
        let payload = compute().await?;
        self.put(key, payload.clone(), ttl);
        Ok(Lookup {
            payload,
            from_cache: false,
        })
    }

    /// Number of live entries (including not-yet-collected expired ones).
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes currently accounted against the budget.
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    fn evict_locked(&self, inner: &mut Inner) {
        while inner.total_bytes > self.config.max_bytes
            || inner.entries.len() > self.config.max_entries
        {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            let Some(key) = victim else {
                break;
            };
            if let Some(entry) = inner.entries.remove(&key) {
                inner.total_bytes -= entry.size_bytes;
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(key, "evicted least-recently-used entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector_payload(len: usize) -> CachePayload {
        CachePayload::Vector(vec![0.5; len])
    }

    fn small_cache(max_bytes: usize, max_entries: usize) -> MemoryCache {
        MemoryCache::new(CacheConfig {
            max_bytes,
            max_entries,
        })
    }

    #[test]
    fn round_trips_a_payload() {
        let cache = small_cache(1024, 16);
        cache.put("embed:m:abc", vector_payload(4), Duration::from_secs(60));
        match cache.get("embed:m:abc") {
            Some(CachePayload::Vector(v)) => assert_eq!(v, vec![0.5; 4]),
            other => panic!("unexpected payload: {other:?}"),
        }
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn expired_entries_behave_as_misses_and_are_removed() {
        let cache = small_cache(1024, 16);
        cache.put("k", vector_payload(2), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn entry_cap_evicts_least_recently_used() {
        let cache = small_cache(1024 * 1024, 2);
        cache.put("a", vector_payload(1), Duration::from_secs(60));
        cache.put("b", vector_payload(1), Duration::from_secs(60));
        // Touch "a" so "b" becomes the eviction victim.
        assert!(cache.get("a").is_some());
        cache.put("c", vector_payload(1), Duration::from_secs(60));
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn byte_budget_evicts_until_under_budget() {
        // Each 8-element vector is 32 bytes; budget holds two of them.
        let cache = small_cache(64, 16);
        cache.put("a", vector_payload(8), Duration::from_secs(60));
        cache.put("b", vector_payload(8), Duration::from_secs(60));
        cache.put("c", vector_payload(8), Duration::from_secs(60));
        assert!(cache.total_bytes() <= 64);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn overwrite_replaces_accounted_bytes() {
        let cache = small_cache(1024, 16);
        cache.put("k", vector_payload(8), Duration::from_secs(60));
        cache.put("k", vector_payload(2), Duration::from_secs(60));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 8);
    }

    #[tokio::test]
    async fn get_or_compute_skips_compute_on_fresh_entries() {
        let cache = small_cache(1024, 16);
        let first = cache
            .get_or_compute("k", Duration::from_secs(60), || async {
                Ok(vector_payload(3))
            })
            .await
            .unwrap();
        assert!(!first.from_cache);
        let second = cache
            .get_or_compute("k", Duration::from_secs(60), || async {
                panic!("compute must not run on a fresh entry")
            })
            .await
            .unwrap();
        assert!(second.from_cache);
    }
}
