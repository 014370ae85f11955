use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// Process-local key/value cache injected into the resolver and the section gate.
///
/// Writes are last-write-wins; implementations only need to be safe under
/// concurrent access.
pub trait Cache<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;

    fn set(&self, key: String, value: V);

    /// Drops every entry whose key starts with `prefix`.
    fn remove_prefix(&self, prefix: &str);

    fn clear(&self);
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// Hash-map cache with an optional time-to-live.
///
/// Time is read from tokio's clock, so a paused test runtime controls expiry.
pub struct MemoryCache<V> {
    ttl: Option<Duration>,
    entries: RwLock<HashMap<String, Entry<V>>>,
}

impl<V> MemoryCache<V> {
    /// Entries expire `ttl` after they were stored.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Entries live until removed explicitly.
    pub fn unbounded() -> Self {
        Self {
            ttl: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, entry: &Entry<V>) -> bool {
        self.ttl
            .map_or(true, |ttl| entry.stored_at.elapsed() < ttl)
    }
}

impl<V: Clone + Send + Sync> Cache<V> for MemoryCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if self.is_fresh(entry) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }
        // Expired: evict, unless another writer refreshed it meanwhile
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| !self.is_fresh(e)) {
            entries.remove(key);
        }
        None
    }

    fn set(&self, key: String, value: V) {
        self.entries.write().insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    fn remove_prefix(&self, prefix: &str) {
        self.entries.write().retain(|key, _| !key.starts_with(prefix));
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ttl_entries_expire() {
        let cache = MemoryCache::with_ttl(Duration::from_secs(5));
        cache.set("acme:false".into(), 1u32);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get("acme:false"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("acme:false"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_entries_never_expire() {
        let cache = MemoryCache::unbounded();
        cache.set("k".into(), true);
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert_eq!(cache.get("k"), Some(true));
    }

    #[test]
    fn remove_prefix_only_touches_matching_keys() {
        let cache = MemoryCache::unbounded();
        cache.set("a:hero".into(), true);
        cache.set("a:menu".into(), false);
        cache.set("b:hero".into(), true);

        cache.remove_prefix("a:");
        assert_eq!(cache.get("a:hero"), None);
        assert_eq!(cache.get("a:menu"), None);
        assert_eq!(cache.get("b:hero"), Some(true));

        cache.clear();
        assert!(cache.is_empty());
    }
}
