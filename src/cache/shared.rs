//! Shared Cache Handle
//!
//! Cloneable, thread-safe handle over a single [`CacheStore`]. Created once at
//! process start and injected wherever the cache is needed.

use std::sync::{Arc, Mutex, MutexGuard};

use axum::http::HeaderMap;

use crate::cache::key;
use crate::cache::{CacheEntry, CacheStats, CacheStore};
use crate::error::{CacheError, Result};

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// Key that was consulted, including any vary segment
    pub key: String,
    /// Fresh entry, if one was found
    pub entry: Option<CacheEntry>,
    /// Store generation at lookup time, for [`CacheHandle::set_if_generation`]
    pub generation: u64,
}

/// Thread-safe handle to the response store.
///
/// Every operation takes the lock for its own duration only and never awaits.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    store: Arc<Mutex<CacheStore>>,
}

impl CacheHandle {
    /// Wraps a store for shared use.
    pub fn new(store: CacheStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Creates a handle over an empty store of the given capacity.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self::new(CacheStore::new(max_entries))
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheStore>> {
        self.store.lock().map_err(|_| CacheError::LockPoisoned)
    }

    // == Lookup ==
    /// Resolves the effective key for `base_key` using any recorded vary
    /// dimension and fetches the entry, all under one lock.
    pub fn lookup(&self, base_key: &str, request_headers: &HeaderMap) -> Result<Lookup> {
        let mut store = self.lock()?;

        let key = match store.vary_headers_for(base_key) {
            Some(names) => key::with_vary(base_key, names, Some(request_headers)),
            None => base_key.to_string(),
        };
        let entry = store.get(&key);

        Ok(Lookup {
            key,
            entry,
            generation: store.generation(),
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.lock()?.get(key))
    }

    pub fn set(&self, key: String, entry: CacheEntry) -> Result<()> {
        self.lock()?.set(key, entry);
        Ok(())
    }

    /// Stores `entry` unless the store was cleared or invalidated after
    /// `generation` was read. Returns whether it was stored.
    pub fn set_if_generation(&self, key: String, entry: CacheEntry, generation: u64) -> Result<bool> {
        Ok(self.lock()?.set_if_generation(key, entry, generation))
    }

    /// Drops every entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        Ok(self.lock()?.clear())
    }

    /// Removes entries whose stored path starts with `prefix`. Intended for
    /// write-path handlers once their mutation has committed.
    pub fn invalidate_by_prefix(&self, prefix: &str) -> Result<usize> {
        Ok(self.lock()?.invalidate_by_prefix(prefix))
    }

    pub fn stats(&self) -> Result<CacheStats> {
        Ok(self.lock()?.stats())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    /// Panics while holding the lock, leaving it poisoned.
    #[cfg(test)]
    pub(crate) fn poison_for_test(&self) {
        let _guard = self.store.lock();
        panic!("poisoning cache store for test");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachedBody, Query};
    use axum::http::HeaderValue;

    fn entry(base_key: &str, vary: Option<Vec<String>>) -> CacheEntry {
        CacheEntry::new(
            "GET",
            "/page",
            base_key,
            CachedBody::Text("hello".to_string()),
            vec![],
            60_000,
        )
        .with_vary(vary)
    }

    #[test]
    fn test_lookup_without_vary_uses_base_key() {
        let handle = CacheHandle::with_capacity(10);
        let base = key::base_key("GET", "/page", &Query::new());
        handle.set(base.clone(), entry(&base, None)).unwrap();

        let lookup = handle.lookup(&base, &HeaderMap::new()).unwrap();
        assert_eq!(lookup.key, base);
        assert!(lookup.entry.is_some());
    }

    #[test]
    fn test_lookup_applies_recorded_vary() {
        let handle = CacheHandle::with_capacity(10);
        let base = key::base_key("GET", "/page", &Query::new());
        let names = vec!["accept-language".to_string()];

        let mut en = HeaderMap::new();
        en.insert("accept-language", HeaderValue::from_static("en"));
        let stored_key = key::with_vary(&base, &names, Some(&en));
        handle
            .set(stored_key.clone(), entry(&base, Some(names)))
            .unwrap();

        let hit = handle.lookup(&base, &en).unwrap();
        assert_eq!(hit.key, stored_key);
        assert!(hit.entry.is_some());

        let mut fr = HeaderMap::new();
        fr.insert("accept-language", HeaderValue::from_static("fr"));
        let miss = handle.lookup(&base, &fr).unwrap();
        assert!(miss.entry.is_none());
    }

    #[test]
    fn test_clones_share_one_store() {
        let handle = CacheHandle::with_capacity(10);
        let other = handle.clone();
        handle.set("k".to_string(), entry("k", None)).unwrap();

        assert_eq!(other.len().unwrap(), 1);
        assert_eq!(other.clear().unwrap(), 1);
        assert_eq!(handle.len().unwrap(), 0);
    }

    #[test]
    fn test_concurrent_sets_respect_capacity() {
        let handle = CacheHandle::with_capacity(16);

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("w{}-{}", worker, i);
                        handle.set(key.clone(), entry(&key, None)).unwrap();
                        let _ = handle.get(&key).unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(handle.len().unwrap(), 16);
    }
}
