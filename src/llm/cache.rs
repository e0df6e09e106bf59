use crate::api::types::Usage;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default capacity for both caches
pub const DEFAULT_CAPACITY: usize = 100;

/// Image payloads live for five minutes
pub const IMAGE_TTL: Duration = Duration::from_secs(5 * 60);

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Bounded LRU map with an optional time-to-live.
///
/// Each call takes the lock once, so a single `get`/`put` is atomic; nothing
/// spans two calls.
pub struct ExpiringLru<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    ttl: Option<Duration>,
}

impl<K: Hash + Eq, V: Clone> ExpiringLru<K, V> {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        self.ttl
            .map(|ttl| entry.inserted_at.elapsed() >= ttl)
            .unwrap_or(false)
    }

    /// Look up a key and mark it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.lock();

        let expired = match entries.peek(key) {
            Some(entry) => self.is_expired(entry),
            None => return None,
        };
        if expired {
            entries.pop(key);
            return None;
        }

        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or replace, evicting the least recently used entry when full.
    pub fn put(&self, key: K, value: V) {
        let mut entries = self.lock();
        let evicted = entries.push(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        if evicted.is_some() {
            tracing::trace!("Evicted LRU cache entry");
        }
    }

    /// Insert only when the key is absent (or expired). Returns whether it stored.
    pub fn put_if_absent(&self, key: K, value: V) -> bool {
        let mut entries = self.lock();

        if let Some(entry) = entries.peek(&key) {
            if !self.is_expired(entry) {
                return false;
            }
        }

        entries.push(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        let entries = self.lock();
        entries
            .peek(key)
            .map(|entry| !self.is_expired(entry))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Image bytes pulled out of a request, kept for the image-analysis consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub media_type: String,
    /// Base64 data or URL, as the client sent it
    pub data: String,
}

/// Process-wide image store keyed by `{request_id}_Image#{ordinal}`
pub struct ImageCache {
    inner: ExpiringLru<String, ImagePayload>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, IMAGE_TTL)
    }

    pub fn with_limits(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: ExpiringLru::new(capacity, Some(ttl)),
        }
    }

    /// Cache key for the `ordinal`-th image of a request
    pub fn key(request_id: &str, ordinal: usize) -> String {
        format!("{}_Image#{}", request_id, ordinal)
    }

    /// Store an image. The first write for a key wins while it is live.
    pub fn store_image(&self, key: impl Into<String>, payload: ImagePayload) {
        let key = key.into();
        if !self.inner.put_if_absent(key.clone(), payload) {
            tracing::debug!("Image {} already cached, keeping first write", key);
        }
    }

    pub fn get_image(&self, key: &str) -> Option<ImagePayload> {
        self.inner.get(&key.to_string())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Last reported usage per session, no expiry
pub struct UsageCache {
    inner: ExpiringLru<String, Usage>,
}

impl UsageCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: ExpiringLru::new(capacity, None),
        }
    }

    pub fn record(&self, session_id: &str, usage: Usage) {
        self.inner.put(session_id.to_string(), usage);
    }

    pub fn get(&self, session_id: &str) -> Option<Usage> {
        self.inner.get(&session_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl Default for UsageCache {
    fn default() -> Self {
        Self::new()
    }
}
