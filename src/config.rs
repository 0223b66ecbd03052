//! Configuration Module
//!
//! Handles loading server and cache configuration from environment variables.
//! Values are read once at process start and never reloaded.

use std::env;

/// Cookie names that mark a request as belonging to a signed-in principal.
pub const DEFAULT_BYPASS_COOKIES: &[&str] = &[
    "session",
    "sessionid",
    "sid",
    "connect.sid",
    "token",
    "access_token",
    "refresh_token",
    "auth_token",
    "jwt",
    "remember_token",
    "phpsessid",
    "jsessionid",
];

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of responses the cache can hold
    pub max_entries: usize,
    /// Upper bound on entry lifetime in milliseconds
    pub ttl_ms: u64,
    /// Cookie names (case-insensitive) that force a cache bypass
    pub bypass_cookies: Vec<String>,
    /// Largest response body, in bytes, that will be captured for storage
    pub max_body_bytes: usize,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_ENTRIES` - Maximum cached responses (default: 1000)
    /// - `CACHE_TTL_MS` - Entry TTL in milliseconds (default: 60000)
    /// - `CACHE_BYPASS_COOKIES` - Comma-separated cookie deny-list
    /// - `CACHE_MAX_BODY_BYTES` - Largest capturable body (default: 1 MiB)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_entries: parse_var("CACHE_MAX_ENTRIES").unwrap_or(defaults.max_entries),
            ttl_ms: parse_var("CACHE_TTL_MS").unwrap_or(defaults.ttl_ms),
            bypass_cookies: env::var("CACHE_BYPASS_COOKIES")
                .ok()
                .map(|v| parse_cookie_list(&v))
                .filter(|names| !names.is_empty())
                .unwrap_or(defaults.bypass_cookies),
            max_body_bytes: parse_var("CACHE_MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl_ms: 60_000,
            bypass_cookies: DEFAULT_BYPASS_COOKIES.iter().map(|s| s.to_string()).collect(),
            max_body_bytes: 1024 * 1024,
            server_port: 3000,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_cookie_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
