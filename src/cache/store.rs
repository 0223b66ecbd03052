//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with FIFO eviction, lazy TTL
//! expiry and per-base-key vary metadata.

use std::collections::HashMap;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::fifo::FifoTracker;
use crate::cache::{CacheEntry, CacheStats};

/// Vary dimension recorded for a base key, kept alive by the entries stored
/// under that base key.
#[derive(Debug)]
struct VaryRecord {
    headers: Option<Vec<String>>,
    live_entries: usize,
}

// == Cache Store ==
/// Bounded response storage with FIFO eviction and lazy TTL expiry.
#[derive(Debug)]
pub struct CacheStore {
    /// Effective key to entry
    entries: HashMap<String, CacheEntry>,
    /// Insertion order tracker
    order: FifoTracker,
    /// Base key to the vary dimension discovered for it
    vary_index: HashMap<String, VaryRecord>,
    /// Performance statistics
    stats: CacheStats,
    /// Maximum number of entries allowed
    max_entries: usize,
    /// Bumped by every clear or invalidation
    generation: u64,
}

impl CacheStore {
    // == Constructor ==
    /// Creates a new CacheStore holding at most `max_entries` entries.
    ///
    /// A capacity of zero disables storage entirely.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: FifoTracker::new(),
            vary_index: HashMap::new(),
            stats: CacheStats::new(),
            max_entries,
            generation: 0,
        }
    }

    // == Set ==
    /// Stores an entry under `key`.
    ///
    /// At capacity, the single oldest-inserted entry is evicted first.
    /// Re-inserting an existing key replaces it wholesale and counts as a fresh
    /// insertion for eviction ordering. The entry's vary headers become the
    /// vary dimension for its base key.
    pub fn set(&mut self, key: String, entry: CacheEntry) {
        if self.max_entries == 0 {
            return;
        }

        // Drop the previous value first so the capacity check sees the real size
        self.remove_entry(&key);

        if self.entries.len() >= self.max_entries {
            if let Some(evicted_key) = self.order.evict_oldest() {
                self.release(&evicted_key);
                self.stats.record_eviction();
            }
        }

        let record = self
            .vary_index
            .entry(entry.base_key.clone())
            .or_insert(VaryRecord {
                headers: None,
                live_entries: 0,
            });
        record.headers = entry.vary_headers.clone();
        record.live_entries += 1;

        self.entries.insert(key.clone(), entry);
        self.order.record_insert(&key);

        self.stats.record_store();
        self.stats.set_total_entries(self.entries.len());
    }

    /// Stores an entry only if no clear or invalidation has happened since
    /// `generation` was read. Returns whether the entry was stored.
    pub fn set_if_generation(&mut self, key: String, entry: CacheEntry, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.set(key, entry);
        true
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // == Get ==
    /// Retrieves a fresh entry by key.
    ///
    /// Stale entries are removed and reported as a miss.
    pub fn get(&mut self, key: &str) -> Option<CacheEntry> {
        self.get_at(key, current_timestamp_ms())
    }

    /// Retrieves a fresh entry by key, judging staleness at `now`.
    pub fn get_at(&mut self, key: &str, now: u64) -> Option<CacheEntry> {
        let stale = match self.entries.get(key) {
            Some(entry) => entry.is_stale_at(now),
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        if stale {
            self.remove_entry(key);
            self.stats.record_expiration();
            self.stats.record_miss();
            return None;
        }

        self.stats.record_hit();
        self.entries.get(key).cloned()
    }

    // == Vary Lookup ==
    /// Returns the vary dimension recorded for a base key, if any.
    pub fn vary_headers_for(&self, base_key: &str) -> Option<&[String]> {
        self.vary_index
            .get(base_key)
            .and_then(|record| record.headers.as_deref())
    }

    // == Clear ==
    /// Drops every entry and all vary metadata. Returns how many entries were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();

        self.entries.clear();
        self.order.clear();
        self.vary_index.clear();
        self.generation += 1;

        self.stats.record_invalidations(removed);
        self.stats.set_total_entries(0);
        removed
    }

    // == Invalidate By Prefix ==
    /// Removes every entry whose stored path (or `METHOD path`) starts with
    /// `prefix`. Returns how many entries were removed.
    pub fn invalidate_by_prefix(&mut self, prefix: &str) -> usize {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.matches_prefix(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            self.remove_entry(key);
        }
        self.generation += 1;

        self.stats.record_invalidations(doomed.len());
        self.stats.set_total_entries(self.entries.len());
        doomed.len()
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        self.order.remove(key);
        let removed = self.release(key);
        self.stats.set_total_entries(self.entries.len());
        removed
    }

    /// Removes the entry and drops its hold on the base key's vary record.
    fn release(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;

        if let Some(record) = self.vary_index.get_mut(&entry.base_key) {
            record.live_entries = record.live_entries.saturating_sub(1);
            if record.live_entries == 0 {
                self.vary_index.remove(&entry.base_key);
            }
        }

        Some(entry)
    }
}
