//! Bounded, TTL- and version-scoped cache for query results, keyed by the
//! query's canonicalised text and its parameters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;

const DEFAULT_CAPACITY: usize = 10_000;
const EVICTION_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub canonical_text: String,
    pub parameters: Vec<(String, String)>,
}

impl CacheKey {
    pub fn new(canonical_text: impl Into<String>, parameters: &[(&str, &Value)]) -> Self {
        let mut parameters: Vec<(String, String)> = parameters
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        parameters.sort();
        Self {
            canonical_text: canonical_text.into(),
            parameters,
        }
    }
}

struct Entry {
    value: Value,
    expires_at: Instant,
    version: u64,
    inserted_at: u64,
}

pub struct QueryCache {
    capacity: usize,
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, Entry>>,
    insertion_counter: RwLock<u64>,
}

impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: RwLock::new(HashMap::new()),
            insertion_counter: RwLock::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::from_secs(60))
    }

    /// Returns the cached value if present, unexpired, and matching
    /// `version`. A stale or version-mismatched entry is evicted on read.
    pub fn get(&self, key: &CacheKey, version: u64) -> Option<Value> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(key) {
                if entry.expires_at > now && entry.version == version {
                    return Some(entry.value.clone());
                }
            } else {
                return None;
            }
        }
        self.entries.write().remove(key);
        None
    }

    pub fn put(&self, key: CacheKey, value: Value, version: u64) {
        let expires_at = Instant::now() + self.ttl;
        let inserted_at = {
            let mut counter = self.insertion_counter.write();
            *counter += 1;
            *counter
        };

        let mut entries = self.entries.write();
        entries.insert(
            key,
            Entry {
                value,
                expires_at,
                version,
                inserted_at,
            },
        );

        if entries.len() > self.capacity {
            evict(&mut entries);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict(entries: &mut HashMap<CacheKey, Entry>) {
    let now = Instant::now();
    let expired_keys: Vec<CacheKey> = entries
        .iter()
        .filter(|(_, entry)| entry.expires_at <= now)
        .map(|(k, _)| k.clone())
        .collect();
    for key in &expired_keys {
        entries.remove(key);
    }

    if entries.is_empty() {
        return;
    }

    let target_evictions = ((entries.len() as f64) * EVICTION_FRACTION).ceil() as usize;
    if target_evictions == 0 {
        return;
    }

    let mut by_age: Vec<(CacheKey, u64)> = entries.iter().map(|(k, e)| (k.clone(), e.inserted_at)).collect();
    by_age.sort_by_key(|(_, inserted_at)| *inserted_at);

    for (key, _) in by_age.into_iter().take(target_evictions) {
        entries.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entry_is_a_miss_and_is_evicted() {
        let cache = QueryCache::new(10, Duration::from_millis(1));
        let key = CacheKey::new("select * from x", &[]);
        cache.put(key.clone(), serde_json::json!([1, 2, 3]), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key, 1).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn version_mismatch_is_a_miss() {
        let cache = QueryCache::new(10, Duration::from_secs(60));
        let key = CacheKey::new("select * from x", &[]);
        cache.put(key.clone(), serde_json::json!(1), 1);
        assert!(cache.get(&key, 2).is_none());
    }

    #[test]
    fn capacity_overflow_evicts_oldest_tenth() {
        let cache = QueryCache::new(10, Duration::from_secs(60));
        for i in 0..11 {
            let key = CacheKey::new(format!("query-{i}"), &[]);
            cache.put(key, serde_json::json!(i), 1);
        }
        assert!(cache.len() <= 10);
    }

    #[test]
    fn parameters_are_part_of_the_key() {
        let a = serde_json::json!("alice");
        let b = serde_json::json!("bob");
        let key_a = CacheKey::new("select", &[("name", &a)]);
        let key_b = CacheKey::new("select", &[("name", &b)]);
        assert_ne!(key_a, key_b);
    }
}
