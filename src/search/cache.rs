use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::model::{SearchFilters, SearchResult};
use crate::entities::EntityKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: EntityKind,
    query: String,
    filters: SearchFilters,
    limit: usize,
    offset: usize,
}

impl CacheKey {
    pub fn new(
        kind: EntityKind,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> Self {
        Self {
            kind,
            query: query.to_string(),
            filters: filters.clone(),
            limit,
            offset,
        }
    }
}

/// Read-through result cache. Entries past their TTL are never returned.
pub struct ResultCache {
    ttl: Duration,
    inner: Option<Mutex<LruCache<CacheKey, (Instant, Vec<SearchResult>)>>>,
}

impl ResultCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<SearchResult>> {
        let inner = self.inner.as_ref()?;
        let mut cache = inner.lock().unwrap_or_else(|e| e.into_inner());
        match cache.get(key) {
            Some((stored, results)) if stored.elapsed() < self.ttl => Some(results.clone()),
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: CacheKey, results: Vec<SearchResult>) {
        if let Some(inner) = &self.inner {
            inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .put(key, (Instant::now(), results));
        }
    }

    pub fn clear(&self) {
        if let Some(inner) = &self.inner {
            inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .as_ref()
            .map(|inner| inner.lock().unwrap_or_else(|e| e.into_inner()).len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(query: &str) -> CacheKey {
        CacheKey::new(EntityKind::Photos, query, &SearchFilters::default(), 10, 0)
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.put(key("a"), Vec::new());
        cache.put(key("b"), Vec::new());
        assert!(cache.get(&key("a")).is_some());
        cache.put(key("c"), Vec::new());
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = ResultCache::new(4, Duration::ZERO);
        cache.put(key("a"), Vec::new());
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn filters_are_part_of_the_key() {
        let cache = ResultCache::new(4, Duration::from_secs(60));
        cache.put(key("a"), Vec::new());
        let filtered = CacheKey::new(
            EntityKind::Photos,
            "a",
            &SearchFilters::default().with_decade("1990s"),
            10,
            0,
        );
        assert!(cache.get(&filtered).is_none());
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let cache = ResultCache::new(0, Duration::from_secs(60));
        cache.put(key("a"), Vec::new());
        assert!(cache.get(&key("a")).is_none());
    }
}
