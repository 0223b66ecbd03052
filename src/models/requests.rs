//! Request DTOs for the gateway API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

/// Request body for prefix invalidation (POST /admin/cache/invalidate)
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    /// Path prefix, optionally qualified with a method (`GET /widgets`)
    pub prefix: String,
}

impl InvalidateRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.prefix.trim().is_empty() {
            return Some("Prefix cannot be empty".to_string());
        }
        None
    }
}

/// Request body for upserting a widget (PUT /widgets/:id)
#[derive(Debug, Clone, Deserialize)]
pub struct WidgetRequest {
    pub name: String,
}

impl WidgetRequest {
    pub fn validate(&self) -> Option<String> {
        if self.name.trim().is_empty() {
            return Some("Widget name cannot be empty".to_string());
        }
        None
    }
}
