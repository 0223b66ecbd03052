//! FIFO Tracker Module
//!
//! Tracks insertion order for first-in-first-out eviction.

use std::collections::VecDeque;

// == FIFO Tracker ==
/// Tracks insertion order for FIFO eviction.
///
/// Keys are stored in a VecDeque where:
/// - Front = Oldest insertion
/// - Back = Newest insertion
///
/// Reads never reorder keys; only inserts do.
#[derive(Debug, Default)]
pub struct FifoTracker {
    order: VecDeque<String>,
}

impl FifoTracker {
    // == Constructor ==
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    // == Record Insert ==
    /// Marks a key as the newest insertion.
    ///
    /// A key that is already tracked is moved to the back, so a re-insert
    /// counts as a fresh insertion.
    pub fn record_insert(&mut self, key: &str) {
        self.remove(key);
        self.order.push_back(key.to_string());
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &str) {
        self.order.retain(|k| k != key);
    }

    // == Evict Oldest ==
    /// Returns and removes the oldest-inserted key.
    ///
    /// Returns None if tracker is empty.
    pub fn evict_oldest(&mut self) -> Option<String> {
        self.order.pop_front()
    }

    /// Returns the oldest-inserted key without removing it.
    #[allow(dead_code)]
    pub fn peek_oldest(&self) -> Option<&String> {
        self.order.front()
    }

    /// Drops every tracked key.
    pub fn clear(&mut self) {
        self.order.clear();
    }

    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
