// Process-wide metadata cache: time-bounded, capacity-bounded.
// Entries are immutable once written; a racing second writer for the same
// key computes an equivalent value, so last-writer-wins is safe.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::ResolvedMetadata;

/// Injectable time source so expiry is testable with a fake clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Real clock used in production.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CacheEntry {
    value: ResolvedMetadata,
    expires_at: Instant,
    inserted_at: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
}

/// Time-bounded key/value store for resolved metadata.
///
/// Expiry is lazy (checked on read); eviction on overflow reclaims expired
/// entries first, then the single oldest-inserted entry. Failed resolutions
/// are never stored, so every miss retries the full cascade.
pub struct MetadataCache {
    inner: Mutex<CacheInner>,
    clock: Box<dyn Clock>,
    ttl: Duration,
    capacity: usize,
}

impl MetadataCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self::with_clock(ttl, capacity, Box::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, capacity: usize, clock: Box<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
            }),
            clock,
            ttl,
            capacity,
        }
    }

    /// Look up a key. An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<ResolvedMetadata> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        match inner.entries.get(key) {
            Some(entry) if now < entry.expires_at => {
                tracing::debug!("metadata cache hit: {}", key);
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a successful resolution. Evicts if at capacity.
    pub fn put(&self, key: &str, value: ResolvedMetadata) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.capacity {
            Self::evict(&mut inner, now);
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + self.ttl,
                inserted_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reclaim expired entries; if none were expired, drop the
    /// oldest-inserted entry to make room.
    fn evict(inner: &mut CacheInner, now: Instant) {
        let before = inner.entries.len();
        inner.entries.retain(|_, e| now < e.expires_at);

        if inner.entries.len() == before {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                tracing::debug!("metadata cache full, evicting oldest entry: {}", key);
                inner.entries.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Clock advanced manually by tests.
    struct FakeClock {
        origin: Instant,
        offset_secs: AtomicU64,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset_secs: AtomicU64::new(0),
            }
        }

        fn advance(&self, secs: u64) {
            self.offset_secs.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for &'static FakeClock {
        fn now(&self) -> Instant {
            self.origin + Duration::from_secs(self.offset_secs.load(Ordering::SeqCst))
        }
    }

    fn leak_clock() -> &'static FakeClock {
        Box::leak(Box::new(FakeClock::new()))
    }

    fn meta(title: &str) -> ResolvedMetadata {
        ResolvedMetadata {
            canonical_title: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_read_before_ttl_returns_latest_value() {
        let clock = leak_clock();
        let cache = MetadataCache::with_clock(Duration::from_secs(100), 10, Box::new(clock));

        cache.put("k", meta("first"));
        cache.put("k", meta("second"));
        clock.advance(99);
        assert_eq!(cache.get("k").unwrap().canonical_title, "second");
    }

    #[test]
    fn test_read_after_ttl_is_a_miss() {
        let clock = leak_clock();
        let cache = MetadataCache::with_clock(Duration::from_secs(100), 10, Box::new(clock));

        cache.put("k", meta("v"));
        clock.advance(101);
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let clock = leak_clock();
        let cache = MetadataCache::with_clock(Duration::from_secs(100), 3, Box::new(clock));

        for i in 0..10 {
            cache.put(&format!("k{}", i), meta("v"));
        }
        assert!(cache.len() <= 3);
    }

    #[test]
    fn test_eviction_prefers_expired_entries() {
        let clock = leak_clock();
        let cache = MetadataCache::with_clock(Duration::from_secs(50), 2, Box::new(clock));

        cache.put("stale", meta("old"));
        clock.advance(60); // "stale" expires
        cache.put("live", meta("a"));
        cache.put("new", meta("b"));

        assert!(cache.get("stale").is_none());
        assert!(cache.get("live").is_some());
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn test_eviction_falls_back_to_oldest_inserted() {
        let clock = leak_clock();
        let cache = MetadataCache::with_clock(Duration::from_secs(100), 2, Box::new(clock));

        cache.put("oldest", meta("a"));
        clock.advance(1);
        cache.put("newer", meta("b"));
        clock.advance(1);
        cache.put("newest", meta("c"));

        assert!(cache.get("oldest").is_none());
        assert!(cache.get("newer").is_some());
        assert!(cache.get("newest").is_some());
    }

    #[test]
    fn test_overwriting_existing_key_does_not_evict() {
        let clock = leak_clock();
        let cache = MetadataCache::with_clock(Duration::from_secs(100), 2, Box::new(clock));

        cache.put("a", meta("1"));
        cache.put("b", meta("2"));
        cache.put("a", meta("3"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").unwrap().canonical_title, "3");
        assert!(cache.get("b").is_some());
    }
}
