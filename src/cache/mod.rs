//! Cache Module
//!
//! Key canonicalization, cacheability policy and the bounded response store.

mod entry;
mod fifo;
pub mod key;
pub mod policy;
mod shared;
mod stats;
mod store;


// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry, CachedBody};
pub use key::{canonicalize, Query};
pub use policy::{BypassPolicy, Principal, Verdict};
pub use shared::{CacheHandle, Lookup};
pub use stats::CacheStats;
pub use store::CacheStore;

// == Public Constants ==
/// Response header reporting how the cache handled a request
pub const X_CACHE: &str = "x-cache";

/// `X-Cache` value for a response served from the cache
pub const X_CACHE_HIT: &str = "HIT";

/// `X-Cache` value for a fresh response that is being captured for storage
pub const X_CACHE_MISS: &str = "MISS";

/// `X-Cache` value for a response that will not be stored
pub const X_CACHE_SKIP: &str = "SKIP";
