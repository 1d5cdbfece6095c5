// Short-lived record of API keys that resolved to nothing, so repeated traffic
// with a bad key does not keep taking the directory read lock.
use crate::metrics_defs::{NEGATIVE_CACHE_HIT, NEGATIVE_CACHE_MISS};
use moka::sync::Cache;
use shared::counter;
use std::time::Duration;

const SIZE: u64 = 10_000;
const TTL_SECS: u64 = 5;

pub struct NegativeCache {
    cache: Cache<String, ()>,
}

impl NegativeCache {
    pub fn new() -> Self {
        let cache = Cache::builder()
            .max_capacity(SIZE)
            .time_to_live(Duration::from_secs(TTL_SECS))
            .build();

        NegativeCache { cache }
    }

    pub fn insert(&self, key: &str) {
        self.cache.insert(key.to_string(), ());
    }

    pub fn invalidate(&self, key: &str) {
        self.cache.invalidate(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        let cache_hit = self.cache.contains_key(key);
        let metric_def = if cache_hit {
            NEGATIVE_CACHE_HIT
        } else {
            NEGATIVE_CACHE_MISS
        };
        counter!(metric_def).increment(1);
        cache_hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_invalidate() {
        let cache = NegativeCache::new();
        assert!(!cache.contains("k1"));
        cache.insert("k1");
        assert!(cache.contains("k1"));
        cache.invalidate("k1");
        assert!(!cache.contains("k1"));
    }
}
