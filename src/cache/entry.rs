//! Cache Entry Module
//!
//! Defines a stored response and the tagged body representation it carries.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

// == Cached Body ==
/// Response body as held by the cache.
///
/// Every variant has a fixed serialization rule, see [`CachedBody::to_bytes`].
#[derive(Debug, Clone, PartialEq)]
pub enum CachedBody {
    /// UTF-8 text, written out as its bytes
    Text(String),
    /// Opaque bytes, written out unchanged
    Binary(Bytes),
    /// JSON value, written out in compact `serde_json` encoding
    Structured(serde_json::Value),
}

impl CachedBody {
    // == Classify ==
    /// Picks the variant for a captured body based on its `Content-Type`.
    ///
    /// A JSON body only becomes `Structured` when compact re-encoding
    /// reproduces the captured bytes exactly, so replay stays byte-identical.
    pub fn classify(content_type: Option<&str>, bytes: Bytes) -> Self {
        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if is_json_mime(&mime) {
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                if serde_json::to_vec(&value).is_ok_and(|encoded| encoded == bytes.as_ref()) {
                    return CachedBody::Structured(value);
                }
            }
        }

        if is_textual_mime(&mime) {
            return match String::from_utf8(bytes.to_vec()) {
                Ok(text) => CachedBody::Text(text),
                Err(_) => CachedBody::Binary(bytes),
            };
        }

        CachedBody::Binary(bytes)
    }

    // == Serialize ==
    /// Returns the wire bytes for this body.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            CachedBody::Text(text) => Bytes::from(text.clone()),
            CachedBody::Binary(bytes) => bytes.clone(),
            CachedBody::Structured(value) => {
                // Value serialization into a Vec cannot fail: keys are strings.
                Bytes::from(serde_json::to_vec(value).unwrap_or_default())
            }
        }
    }

    /// Returns the body length in bytes once serialized.
    pub fn len(&self) -> usize {
        match self {
            CachedBody::Text(text) => text.len(),
            CachedBody::Binary(bytes) => bytes.len(),
            CachedBody::Structured(_) => self.to_bytes().len(),
        }
    }

    /// Returns true when the serialized body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_json_mime(mime: &str) -> bool {
    mime == "application/json" || mime.ends_with("+json")
}

fn is_textual_mime(mime: &str) -> bool {
    mime.starts_with("text/")
        || is_json_mime(mime)
        || mime == "application/xml"
        || mime.ends_with("+xml")
        || mime == "application/javascript"
}

// == Cache Entry ==
/// A stored response. Entries are replaced wholesale, never mutated in place.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The response body
    pub body: CachedBody,
    /// Response headers in recorded order, duplicates preserved
    pub headers: Vec<(String, String)>,
    /// Storage timestamp (Unix milliseconds)
    pub stored_at: u64,
    /// Lifetime in milliseconds
    pub ttl_ms: u64,
    /// Lower-cased request header names this response varies on
    pub vary_headers: Option<Vec<String>>,
    /// Request method the response answered
    pub method: String,
    /// Query-stripped request path
    pub path: String,
    /// Key of the request without vary dimensions
    pub base_key: String,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry stamped with the current time.
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        base_key: impl Into<String>,
        body: CachedBody,
        headers: Vec<(String, String)>,
        ttl_ms: u64,
    ) -> Self {
        Self {
            body,
            headers,
            stored_at: current_timestamp_ms(),
            ttl_ms,
            vary_headers: None,
            method: method.into(),
            path: path.into(),
            base_key: base_key.into(),
        }
    }

    /// Sets the vary dimension recorded with this entry.
    pub fn with_vary(mut self, vary_headers: Option<Vec<String>>) -> Self {
        self.vary_headers = vary_headers.filter(|names| !names.is_empty());
        self
    }

    // == Is Stale ==
    /// Checks whether the entry outlived its TTL at `now` (Unix milliseconds).
    ///
    /// Boundary condition: an entry aged exactly `ttl_ms` is still fresh.
    pub fn is_stale_at(&self, now: u64) -> bool {
        now.saturating_sub(self.stored_at) > self.ttl_ms
    }

    /// Checks whether the entry is stale right now.
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(current_timestamp_ms())
    }

    /// Returns milliseconds since the entry was stored.
    pub fn age_ms(&self) -> u64 {
        current_timestamp_ms().saturating_sub(self.stored_at)
    }

    // == Prefix Match ==
    /// True when the stored path, or `METHOD path`, starts with `prefix`.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        if self.path.starts_with(prefix) {
            return true;
        }
        prefix
            .strip_prefix(self.method.as_str())
            .and_then(|rest| rest.strip_prefix(' '))
            .is_some_and(|path_prefix| self.path.starts_with(path_prefix))
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
