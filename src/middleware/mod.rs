//! Middleware Module
//!
//! The response cache pipeline stage and the body interceptor it installs.

pub mod interceptor;
pub mod response_cache;

pub use interceptor::{intercept, CaptureBody, CaptureContext};
pub use response_cache::{response_cache_middleware, ResponseCacheState};
