use hyper::body::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A cached static-asset body together with its content type.
#[derive(Debug, Clone)]
pub struct CachedAsset {
    pub body: Bytes,
    pub content_type: String,
    inserted_at: Instant,
}

struct CacheInner {
    entries: HashMap<String, CachedAsset>,
    // Insertion log used for eviction. A pair is live only while the map
    // entry still carries the same timestamp; pairs orphaned by TTL removal
    // or an in-place update are skipped when they surface.
    order: VecDeque<(String, Instant)>,
}

/// Bounded in-memory store for static-asset responses.
///
/// Entries expire after `ttl` and the total count never exceeds
/// `max_entries`; when full, the entry with the earliest insertion
/// timestamp is evicted regardless of how recently it was read.
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            max_entries,
        }
    }

    /// Returns the cached asset for `key`, removing and missing it once its
    /// age exceeds the TTL.
    pub fn get(&self, key: &str) -> Option<CachedAsset> {
        let mut inner = self.inner.lock().unwrap();
        let expired = inner.entries.get(key)?.inserted_at.elapsed() > self.ttl;
        if expired {
            inner.entries.remove(key);
            return None;
        }
        inner.entries.get(key).cloned()
    }

    /// Stores an asset under `key`, evicting the oldest-inserted entry
    /// first when the cache is full. Re-inserting an existing key updates
    /// it in place with a fresh timestamp.
    pub fn put(&self, key: &str, body: Bytes, content_type: &str) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        if !inner.entries.contains_key(key) {
            while inner.entries.len() >= self.max_entries {
                let Some((oldest, stamp)) = inner.order.pop_front() else {
                    break;
                };
                if inner
                    .entries
                    .get(&oldest)
                    .is_some_and(|entry| entry.inserted_at == stamp)
                {
                    inner.entries.remove(&oldest);
                }
            }
        }
        inner.entries.insert(
            key.to_string(),
            CachedAsset {
                body,
                content_type: content_type.to_string(),
                inserted_at: now,
            },
        );
        inner.order.push_back((key.to_string(), now));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}
