use std::sync::Arc;

use moka::sync::Cache;
use page_store_common::BackendPageIdentifier;

/// LRU cache of raw backend pages, backed by moka.
///
/// Keyed by `(page_number, transaction_id)`: a backend row is immutable
/// once written, so entries never need invalidation — superseded versions
/// simply stop being requested and age out.
pub struct PageCache {
    cache: Cache<BackendPageIdentifier, Arc<Vec<u8>>>,
}

impl PageCache {
    /// Create a cache with the given maximum number of entries.
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::new(max_entries),
        }
    }

    pub fn get(&self, id: BackendPageIdentifier) -> Option<Arc<Vec<u8>>> {
        self.cache.get(&id)
    }

    pub fn insert(&self, id: BackendPageIdentifier, data: Arc<Vec<u8>>) {
        self.cache.insert(id, data);
    }

    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_miss() {
        let cache = PageCache::new(100);
        assert!(cache.get(BackendPageIdentifier::new(1, 1)).is_none());
    }

    #[test]
    fn test_cache_hit() {
        let cache = PageCache::new(100);
        cache.insert(BackendPageIdentifier::new(1, 5), Arc::new(vec![0xAB]));

        let hit = cache.get(BackendPageIdentifier::new(1, 5)).unwrap();
        assert_eq!(*hit, vec![0xAB]);
    }

    #[test]
    fn test_versions_are_separate() {
        let cache = PageCache::new(100);
        cache.insert(BackendPageIdentifier::new(1, 5), Arc::new(vec![1]));
        cache.insert(BackendPageIdentifier::new(1, 10), Arc::new(vec![2]));

        assert_eq!(*cache.get(BackendPageIdentifier::new(1, 5)).unwrap(), vec![1]);
        assert_eq!(*cache.get(BackendPageIdentifier::new(1, 10)).unwrap(), vec![2]);
    }

    #[test]
    fn test_eviction() {
        let cache = PageCache::new(2);
        for i in 0..3 {
            cache.insert(BackendPageIdentifier::new(i, 1), Arc::new(vec![i as u8]));
        }
        // moka eviction is async; just verify the newest entry survives.
        assert!(cache.get(BackendPageIdentifier::new(2, 1)).is_some());
    }
}
