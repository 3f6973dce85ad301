//! Response Cache
//!
//! Explicit TTL cache for read endpoints, keyed by route + query. Owned by
//! the HTTP layer; never sits on the ledger's transactional path. Mutating
//! handlers invalidate the affected keys.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<RwLock<HashMap<String, (Instant, serde_json::Value)>>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entries = self.entries.read();
        let (stored_at, value) = entries.get(key)?;
        if stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(value.clone())
    }

    pub fn put(&self, key: &str, value: serde_json::Value) {
        self.entries
            .write()
            .insert(key.to_string(), (Instant::now(), value));
    }

    /// Drop every key with the given route prefix.
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.entries.write().retain(|k, _| !k.starts_with(prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_put_and_expiry() {
        let cache = ResponseCache::new(Duration::from_millis(20));
        assert!(cache.get("elections:all").is_none());

        cache.put("elections:all", json!([{"id": "e1"}]));
        assert_eq!(cache.get("elections:all"), Some(json!([{"id": "e1"}])));

        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get("elections:all").is_none());
    }

    #[test]
    fn test_invalidate_prefix() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.put("elections:all", json!(1));
        cache.put("elections:e1", json!(2));
        cache.put("other:key", json!(3));

        cache.invalidate_prefix("elections:");
        assert!(cache.get("elections:all").is_none());
        assert!(cache.get("elections:e1").is_none());
        assert_eq!(cache.get("other:key"), Some(json!(3)));
    }
}
