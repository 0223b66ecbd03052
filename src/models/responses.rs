//! Response DTOs for the gateway API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::CacheStats;

/// A widget as returned by the demo business routes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetResponse {
    pub id: u64,
    pub name: String,
}

impl WidgetResponse {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Response body for the cache statistics endpoint (GET /admin/cache/stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub stores: u64,
    pub invalidations: u64,
    /// Current number of entries in cache
    pub total_entries: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            hits: stats.hits,
            misses: stats.misses,
            expirations: stats.expirations,
            evictions: stats.evictions,
            stores: stats.stores,
            invalidations: stats.invalidations,
            total_entries: stats.total_entries,
        }
    }
}

/// Response body for a full flush (DELETE /admin/cache)
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    /// Success message
    pub message: String,
    /// Number of entries dropped
    pub removed: usize,
}

impl ClearResponse {
    pub fn new(removed: usize) -> Self {
        Self {
            message: format!("Cache cleared, {} entries removed", removed),
            removed,
        }
    }
}

/// Response body for prefix invalidation (POST /admin/cache/invalidate)
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Success message
    pub message: String,
    /// The prefix that was invalidated
    pub prefix: String,
    /// Number of entries dropped
    pub removed: usize,
}

impl InvalidateResponse {
    pub fn new(prefix: impl Into<String>, removed: usize) -> Self {
        let prefix = prefix.into();
        Self {
            message: format!("Invalidated {} entries under '{}'", removed, prefix),
            prefix,
            removed,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widget_response_serializes_in_key_order() {
        let json = serde_json::to_string(&WidgetResponse::new(5, "bolt")).unwrap();
        assert_eq!(json, r#"{"id":5,"name":"bolt"}"#);
    }

    #[test]
    fn test_stats_response_from_stats() {
        let mut stats = CacheStats::new();
        for _ in 0..4 {
            stats.record_hit();
        }
        stats.record_miss();
        stats.set_total_entries(3);

        let resp = StatsResponse::from(stats);
        assert!((resp.hit_rate - 0.8).abs() < 0.001);
        assert_eq!(resp.total_entries, 3);
    }

    #[test]
    fn test_clear_response_serialize() {
        let json = serde_json::to_string(&ClearResponse::new(7)).unwrap();
        assert!(json.contains("\"removed\":7"));
    }

    #[test]
    fn test_invalidate_response_serialize() {
        let json = serde_json::to_string(&InvalidateResponse::new("/widgets", 2)).unwrap();
        assert!(json.contains("/widgets"));
        assert!(json.contains("\"removed\":2"));
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = ErrorResponse::new("Something went wrong");
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"error":"Something went wrong"}"#);
    }
}
