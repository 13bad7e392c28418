//! Generic weak-reference client cache (spec §4.7 `ClientCacheManager`).
//!
//! Target handlers that own a pooled transport client (an HTTP
//! `reqwest::Client`, an MQTT session) key it by some stable string (a host,
//! a target id) and hand out `Arc`s from here instead of reconnecting on
//! every send. Mirrors the original `Utils::ClientCacheManager<ClientType,
//! ConfigType>`: entries are held weakly so a handler that stops using a
//! client lets it drop, and every ~100th access sweeps dead weak refs out of
//! the map rather than maintaining a separate GC task.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

const SWEEP_INTERVAL: u64 = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct ClientCacheStats {
    pub live: usize,
    pub tracked: usize,
}

/// `T` is the pooled client type, `C` is whatever config the factory needs
/// to build one (a parsed URL, broker address, ...).
pub struct ClientCacheManager<T, C> {
    entries: DashMap<String, Weak<T>>,
    factory: Box<dyn Fn(&C) -> Arc<T> + Send + Sync>,
    accesses: AtomicU64,
}

impl<T, C> ClientCacheManager<T, C> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&C) -> Arc<T> + Send + Sync + 'static,
    {
        Self { entries: DashMap::new(), factory: Box::new(factory), accesses: AtomicU64::new(0) }
    }

    /// Returns the cached client for `key`, building a fresh one via the
    /// factory if none is cached or the cached one was already dropped.
    pub fn get_or_create(&self, key: &str, config: &C) -> Arc<T> {
        if self.accesses.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == 0 {
            self.sweep();
        }

        if let Some(entry) = self.entries.get(key) {
            if let Some(client) = entry.upgrade() {
                return client;
            }
        }

        let client = (self.factory)(config);
        self.entries.insert(key.to_string(), Arc::downgrade(&client));
        client
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drops map entries whose weak ref no longer upgrades.
    fn sweep(&self) {
        self.entries.retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn stats(&self) -> ClientCacheStats {
        let live = self.entries.iter().filter(|e| e.value().strong_count() > 0).count();
        ClientCacheStats { live, tracked: self.entries.len() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_live_client_for_same_key() {
        let cache: ClientCacheManager<String, String> = ClientCacheManager::new(|c: &String| Arc::new(c.clone()));
        let a = cache.get_or_create("host-1", &"host-1".to_string());
        let b = cache.get_or_create("host-1", &"host-1".to_string());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn rebuilds_after_client_dropped() {
        let cache: ClientCacheManager<String, String> = ClientCacheManager::new(|c: &String| Arc::new(c.clone()));
        {
            let _a = cache.get_or_create("host-1", &"host-1".to_string());
        }
        let b = cache.get_or_create("host-1", &"host-1".to_string());
        assert_eq!(*b, "host-1");
    }

    #[test]
    fn sweep_clears_dead_entries_every_hundredth_access() {
        let cache: ClientCacheManager<String, String> = ClientCacheManager::new(|c: &String| Arc::new(c.clone()));
        for i in 0..100 {
            let key = format!("k{i}");
            let _ = cache.get_or_create(&key, &key);
        }
        assert_eq!(cache.stats().tracked, 100);
        // The 101st access (accesses counter wraps past 100) sweeps the
        // now-dead entries before inserting the new one.
        let _ = cache.get_or_create("k100", &"k100".to_string());
        assert_eq!(cache.stats().tracked, 1);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache: ClientCacheManager<String, String> = ClientCacheManager::new(|c: &String| Arc::new(c.clone()));
        let _a = cache.get_or_create("host-1", &"host-1".to_string());
        cache.clear();
        assert_eq!(cache.stats().tracked, 0);
    }
}
