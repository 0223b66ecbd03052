//! API Module
//!
//! HTTP handlers and routing for the demo gateway.
//!
//! # Endpoints
//! - `GET /widgets`, `GET /widgets/:id` - Cacheable reads
//! - `PUT /widgets/:id` - Write path that invalidates cached widgets
//! - `GET /admin/cache/stats` - Cache statistics
//! - `DELETE /admin/cache` - Flush the cache
//! - `POST /admin/cache/invalidate` - Invalidate by prefix
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
