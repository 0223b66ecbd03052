//! Gateway Cache - HTTP response caching for an axum request pipeline
//!
//! Serves repeated GET requests from a bounded in-memory store keyed by a
//! canonical request identity, honouring `Cache-Control` and `Vary`.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;

pub use api::AppState;
pub use cache::CacheHandle;
pub use config::Config;
pub use middleware::{response_cache_middleware, ResponseCacheState};
