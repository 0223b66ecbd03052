//! Response Cache Middleware
//!
//! Composes key canonicalization, the bypass policy, the store and the
//! response interceptor into a single axum middleware.
//!
//! # Example
//!
//! ```ignore
//! use axum::{middleware, routing::get, Router};
//! use gateway_cache::middleware::{response_cache_middleware, ResponseCacheState};
//!
//! let state = ResponseCacheState::from_config(cache.clone(), &config);
//! let app = Router::new()
//!     .route("/widgets", get(list_widgets))
//!     .layer(middleware::from_fn_with_state(state, response_cache_middleware));
//! ```

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method, Response, StatusCode},
    middleware::Next,
};
use tracing::{debug, warn};

use crate::cache::key;
use crate::cache::{BypassPolicy, CacheEntry, CacheHandle, Query, X_CACHE, X_CACHE_HIT, X_CACHE_SKIP};
use crate::config::Config;
use crate::middleware::interceptor::{intercept, CaptureContext};

/// State shared by every invocation of [`response_cache_middleware`].
#[derive(Debug, Clone)]
pub struct ResponseCacheState {
    /// The injected store
    pub cache: CacheHandle,
    policy: Arc<BypassPolicy>,
    ttl_ms: u64,
    max_body_bytes: usize,
}

impl ResponseCacheState {
    pub fn new(cache: CacheHandle, policy: BypassPolicy, ttl_ms: u64, max_body_bytes: usize) -> Self {
        Self {
            cache,
            policy: Arc::new(policy),
            ttl_ms,
            max_body_bytes,
        }
    }

    /// Builds the middleware state from process configuration.
    pub fn from_config(cache: CacheHandle, config: &Config) -> Self {
        Self::new(
            cache,
            BypassPolicy::new(&config.bypass_cookies),
            config.ttl_ms,
            config.max_body_bytes,
        )
    }
}

/// Axum middleware serving cached GET responses and capturing fresh ones.
///
/// - Non-GET requests pass through untouched.
/// - Bypassed requests (credentials, deny-listed cookies, request
///   `no-cache`/`no-store`/`private`) are forwarded and marked `SKIP`.
/// - Hits are answered from the store without running the handler.
/// - Misses run the handler; cacheable responses are stored once their body
///   has been fully sent.
///
/// Internal failures never block the response: it is delivered uncached.
pub async fn response_cache_middleware(
    State(state): State<ResponseCacheState>,
    request: Request,
    next: Next,
) -> Response<Body> {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    if let Some(reason) = state
        .policy
        .bypass_reason(request.headers(), request.extensions())
    {
        debug!(path = %request.uri().path(), ?reason, "cache bypassed");
        return skip(next.run(request).await);
    }

    let path = request.uri().path().to_string();
    let query = Query::parse(request.uri().query().unwrap_or_default());
    let base_key = key::base_key(Method::GET.as_str(), &path, &query);

    let lookup = match state.cache.lookup(&base_key, request.headers()) {
        Ok(lookup) => lookup,
        Err(err) => {
            warn!(key = %base_key, error = %err, "cache lookup failed, serving uncached");
            return skip(next.run(request).await);
        }
    };

    if let Some(entry) = lookup.entry {
        debug!(key = %lookup.key, age_ms = entry.age_ms(), "cache hit");
        return replay(entry);
    }

    debug!(key = %lookup.key, "cache miss");
    let ctx = CaptureContext {
        cache: state.cache.clone(),
        method: Method::GET.to_string(),
        path,
        base_key,
        request_headers: request.headers().clone(),
        ttl_ms: state.ttl_ms,
        max_body_bytes: state.max_body_bytes,
        generation: lookup.generation,
    };

    let response = next.run(request).await;
    intercept(response, ctx)
}

fn skip(mut response: Response<Body>) -> Response<Body> {
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(X_CACHE_SKIP));
    response
}

/// Rebuilds a response from a stored entry, headers in recorded order.
fn replay(entry: CacheEntry) -> Response<Body> {
    let mut response = Response::new(Body::from(entry.body.to_bytes()));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    for (name, value) in &entry.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "dropping unreplayable stored header"),
        }
    }
    headers.insert(X_CACHE, HeaderValue::from_static(X_CACHE_HIT));

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        http::{header, Request as HttpRequest},
        middleware,
        response::IntoResponse,
        routing::get,
        Router,
    };
    use tower::util::ServiceExt;

    fn app(cache: CacheHandle, calls: Arc<AtomicUsize>) -> Router {
        let state = ResponseCacheState::new(cache, BypassPolicy::new(["sessionid"]), 60_000, 1024);
        Router::new()
            .route(
                "/widgets",
                get(move || {
                    let calls = calls.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        (
                            [(header::CACHE_CONTROL, "public, max-age=60")],
                            format!("widgets #{}", n),
                        )
                            .into_response()
                    }
                })
                .post(|| async { "created" }),
            )
            .layer(middleware::from_fn_with_state(state, response_cache_middleware))
    }

    async fn send(app: &Router, method: &str, uri: &str) -> Response<Body> {
        app.clone()
            .oneshot(
                HttpRequest::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_miss_then_hit_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(CacheHandle::with_capacity(10), calls.clone());

        let first = send(&app, "GET", "/widgets").await;
        assert_eq!(first.headers()[X_CACHE], "MISS");
        assert_eq!(body_text(first).await, "widgets #0");

        let second = send(&app, "GET", "/widgets").await;
        assert_eq!(second.headers()[X_CACHE], "HIT");
        assert_eq!(body_text(second).await, "widgets #0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_get_passes_through_untouched() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(CacheHandle::with_capacity(10), calls);

        let response = send(&app, "POST", "/widgets").await;
        assert!(response.headers().get(X_CACHE).is_none());
        assert_eq!(body_text(response).await, "created");
    }

    #[tokio::test]
    async fn test_query_order_shares_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(CacheHandle::with_capacity(10), calls.clone());

        let _ = body_text(send(&app, "GET", "/widgets?b=2&a=1").await).await;
        let second = send(&app, "GET", "/widgets?a=1&b=2").await;

        assert_eq!(second.headers()[X_CACHE], "HIT");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poisoned_store_still_serves() {
        let cache = CacheHandle::with_capacity(10);
        let poisoner = cache.clone();
        let _ = std::thread::spawn(move || {
            poisoner.poison_for_test();
        })
        .join();

        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(cache, calls.clone());

        let response = send(&app, "GET", "/widgets").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CACHE], "SKIP");
        assert_eq!(body_text(response).await, "widgets #0");
    }

    #[test]
    fn test_replay_restores_headers_in_order() {
        let entry = CacheEntry::new(
            "GET",
            "/widgets",
            "GET /widgets?{}",
            crate::cache::CachedBody::Text("cached".to_string()),
            vec![
                ("content-type".to_string(), "text/plain".to_string()),
                ("x-trace".to_string(), "a".to_string()),
                ("x-trace".to_string(), "b".to_string()),
            ],
            60_000,
        );

        let response = replay(entry);
        let traces: Vec<_> = response.headers().get_all("x-trace").iter().collect();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CACHE], "HIT");
        assert_eq!(traces, vec!["a", "b"]);
    }
}
