//! Response Interceptor
//!
//! Wraps a downstream response so that its final body is captured into the
//! cache exactly once, without altering or delaying what the client receives.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Response};
use bytes::{Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame, SizeHint};
use tracing::{debug, warn};

use crate::cache::key;
use crate::cache::policy::{self, Verdict};
use crate::cache::{CacheEntry, CacheHandle, CachedBody, X_CACHE, X_CACHE_MISS, X_CACHE_SKIP};

/// Headers that describe a single connection and are never recorded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

type OnComplete = Box<dyn FnOnce(Bytes) + Send + 'static>;

// == Capture Body ==
/// Body decorator that forwards every frame untouched while teeing data into
/// a buffer, then hands the buffer to a callback once the body completes.
///
/// A body can finish in several ways: the inner body yields `None`, yields a
/// trailers frame, reports `is_end_stream()` right after a data frame (hyper
/// stops polling at that point), or is already finished when wrapped. The
/// callback lives in an `Option` that is taken on first completion, so it runs
/// at most once whichever paths fire.
pub struct CaptureBody<B> {
    inner: B,
    buffer: BytesMut,
    limit: usize,
    on_complete: Option<OnComplete>,
}

impl<B> CaptureBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
{
    /// Wraps `inner`. Bodies larger than `limit` bytes are passed through but
    /// not captured.
    pub fn new<F>(inner: B, limit: usize, on_complete: F) -> Self
    where
        F: FnOnce(Bytes) + Send + 'static,
    {
        let mut body = Self {
            inner,
            buffer: BytesMut::new(),
            limit,
            on_complete: Some(Box::new(on_complete)),
        };
        if body.inner.is_end_stream() {
            body.complete();
        }
        body
    }

    /// True while the capture callback has not fired nor been abandoned.
    pub fn is_armed(&self) -> bool {
        self.on_complete.is_some()
    }

    fn complete(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(std::mem::take(&mut self.buffer).freeze());
        }
    }

    fn abandon(&mut self) {
        self.on_complete = None;
        self.buffer = BytesMut::new();
    }

    fn tee(&mut self, data: &Bytes) {
        if self.on_complete.is_none() {
            return;
        }
        if self.buffer.len() + data.len() > self.limit {
            debug!(limit = self.limit, "response body exceeds capture limit, not caching");
            self.abandon();
        } else {
            self.buffer.extend_from_slice(data);
        }
    }
}

impl<B> HttpBody for CaptureBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.tee(data);
                    if this.inner.is_end_stream() {
                        this.complete();
                    }
                } else if frame.is_trailers() {
                    this.complete();
                }
            }
            Poll::Ready(Some(Err(_))) => this.abandon(),
            Poll::Ready(None) => this.complete(),
            Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

// == Intercept ==
/// Everything the capture step needs to know about the originating request.
#[derive(Debug, Clone)]
pub struct CaptureContext {
    pub cache: CacheHandle,
    pub method: String,
    pub path: String,
    pub base_key: String,
    pub request_headers: HeaderMap,
    /// Configured TTL upper bound
    pub ttl_ms: u64,
    pub max_body_bytes: usize,
    /// Store generation seen by the lookup; the store is skipped if it moved
    pub generation: u64,
}

/// Evaluates the downstream response head and, when it is cacheable, wraps
/// the body so the entry is stored once the body completes.
///
/// Sets `X-Cache: MISS` when capture is armed and `X-Cache: SKIP` otherwise.
pub fn intercept(response: Response<Body>, ctx: CaptureContext) -> Response<Body> {
    let (mut parts, body) = response.into_parts();

    let (vary_headers, max_age) = match policy::evaluate_response(parts.status, &parts.headers) {
        Verdict::Store {
            vary_headers,
            max_age,
        } => (vary_headers, max_age),
        Verdict::Skip(reason) => {
            debug!(key = %ctx.base_key, ?reason, "response not cacheable");
            parts.headers.insert(X_CACHE, HeaderValue::from_static(X_CACHE_SKIP));
            return Response::from_parts(parts, body);
        }
    };

    let Some(recorded) = record_headers(&parts.headers) else {
        debug!(key = %ctx.base_key, "response carries non-text headers, not caching");
        parts.headers.insert(X_CACHE, HeaderValue::from_static(X_CACHE_SKIP));
        return Response::from_parts(parts, body);
    };

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ttl_ms = max_age
        .map(|age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX).min(ctx.ttl_ms))
        .unwrap_or(ctx.ttl_ms);
    let storage_key = match &vary_headers {
        Some(names) => key::with_vary(&ctx.base_key, names, Some(&ctx.request_headers)),
        None => ctx.base_key.clone(),
    };

    let CaptureContext {
        cache,
        method,
        path,
        base_key,
        max_body_bytes,
        generation,
        ..
    } = ctx;

    let on_complete = move |bytes: Bytes| {
        let body = CachedBody::classify(content_type.as_deref(), bytes);
        let entry = CacheEntry::new(method, path, base_key, body, recorded, ttl_ms)
            .with_vary(vary_headers);

        match cache.set_if_generation(storage_key.clone(), entry, generation) {
            Ok(true) => debug!(key = %storage_key, ttl_ms, "response stored"),
            Ok(false) => debug!(key = %storage_key, "cache invalidated during capture, not storing"),
            Err(err) => warn!(key = %storage_key, error = %err, "failed to store response"),
        }
    };

    parts.headers.insert(X_CACHE, HeaderValue::from_static(X_CACHE_MISS));
    let body = Body::new(CaptureBody::new(body, max_body_bytes, on_complete));
    Response::from_parts(parts, body)
}

/// Copies response headers for storage, in order and with duplicates.
/// Returns `None` if any header value is not valid text.
fn record_headers(headers: &HeaderMap) -> Option<Vec<(String, String)>> {
    let mut recorded = Vec::with_capacity(headers.len());

    for (name, value) in headers {
        let name = name.as_str();
        if name == X_CACHE || HOP_BY_HOP.contains(&name) {
            continue;
        }
        recorded.push((name.to_string(), value.to_str().ok()?.to_string()));
    }

    Some(recorded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::http::StatusCode;
    use http_body_util::{BodyExt, Full};

    use crate::cache::Query;

    /// Yields the given chunks, optionally followed by trailers.
    struct Chunks {
        chunks: VecDeque<Bytes>,
        trailers: Option<HeaderMap>,
    }

    impl HttpBody for Chunks {
        type Data = Bytes;
        type Error = Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
            if let Some(chunk) = self.chunks.pop_front() {
                return Poll::Ready(Some(Ok(Frame::data(chunk))));
            }
            Poll::Ready(self.trailers.take().map(|t| Ok(Frame::trailers(t))))
        }
    }

    fn recorder() -> (Arc<AtomicUsize>, Arc<Mutex<Vec<Bytes>>>, impl FnOnce(Bytes) + Send) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (c, s) = (calls.clone(), seen.clone());
        let callback = move |bytes: Bytes| {
            c.fetch_add(1, Ordering::SeqCst);
            s.lock().unwrap().push(bytes);
        };
        (calls, seen, callback)
    }

    #[tokio::test]
    async fn test_capture_fires_once_for_sized_body() {
        // Full reports end-of-stream right after its only frame, and collect()
        // still polls once more for None: two completion paths fire.
        let (calls, seen, callback) = recorder();
        let body = CaptureBody::new(Full::new(Bytes::from("hello")), 1024, callback);

        let collected = body.collect().await.unwrap().to_bytes();

        assert_eq!(collected, Bytes::from("hello"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap()[0], Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_capture_streamed_chunks_with_trailers() {
        let (calls, seen, callback) = recorder();
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", HeaderValue::from_static("abc"));
        let inner = Chunks {
            chunks: VecDeque::from(vec![Bytes::from("ab"), Bytes::from("cd")]),
            trailers: Some(trailers),
        };

        let collected = CaptureBody::new(inner, 1024, callback)
            .collect()
            .await
            .unwrap();

        assert!(collected.trailers().is_some());
        assert_eq!(collected.to_bytes(), Bytes::from("abcd"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap()[0], Bytes::from("abcd"));
    }

    #[tokio::test]
    async fn test_capture_empty_body_completes_immediately() {
        let (calls, seen, callback) = recorder();
        let body = CaptureBody::new(Full::new(Bytes::new()), 1024, callback);

        assert!(!body.is_armed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let _ = body.collect().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(seen.lock().unwrap()[0].is_empty());
    }

    #[tokio::test]
    async fn test_capture_over_limit_is_abandoned_but_delivered() {
        let (calls, _seen, callback) = recorder();
        let inner = Chunks {
            chunks: VecDeque::from(vec![Bytes::from("12345"), Bytes::from("67890")]),
            trailers: None,
        };

        let collected = CaptureBody::new(inner, 8, callback)
            .collect()
            .await
            .unwrap()
            .to_bytes();

        assert_eq!(collected, Bytes::from("1234567890"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropped_body_stores_nothing() {
        let (calls, _seen, callback) = recorder();
        let inner = Chunks {
            chunks: VecDeque::from(vec![Bytes::from("partial")]),
            trailers: None,
        };

        let body = CaptureBody::new(inner, 1024, callback);
        assert!(body.is_armed());
        drop(body);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    fn context(cache: &CacheHandle) -> CaptureContext {
        let query = Query::new();
        CaptureContext {
            cache: cache.clone(),
            method: "GET".to_string(),
            path: "/widgets".to_string(),
            base_key: key::base_key("GET", "/widgets", &query),
            request_headers: HeaderMap::new(),
            ttl_ms: 60_000,
            max_body_bytes: 1024,
            generation: 0,
        }
    }

    fn response(cache_control: Option<&'static str>) -> Response<Body> {
        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain")
            .header(header::CONNECTION, "keep-alive");
        if let Some(cc) = cache_control {
            builder = builder.header(header::CACHE_CONTROL, cc);
        }
        builder.body(Body::from("widgets")).unwrap()
    }

    #[tokio::test]
    async fn test_intercept_stores_cacheable_response() {
        let cache = CacheHandle::with_capacity(10);
        let ctx = context(&cache);
        let base = ctx.base_key.clone();

        let response = intercept(response(Some("public, max-age=30")), ctx);
        assert_eq!(response.headers()[X_CACHE], "MISS");
        assert!(cache.get(&base).unwrap().is_none(), "stored only after completion");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes, Bytes::from("widgets"));

        let entry = cache.get(&base).unwrap().expect("entry stored");
        assert_eq!(entry.body, CachedBody::Text("widgets".to_string()));
        assert_eq!(entry.ttl_ms, 30_000);
        assert!(entry.headers.iter().all(|(n, _)| n != "connection" && n != X_CACHE));
        assert!(entry
            .headers
            .contains(&("cache-control".to_string(), "public, max-age=30".to_string())));
    }

    #[tokio::test]
    async fn test_intercept_ttl_capped_by_config() {
        let cache = CacheHandle::with_capacity(10);
        let mut ctx = context(&cache);
        ctx.ttl_ms = 5_000;
        let base = ctx.base_key.clone();

        let response = intercept(response(Some("max-age=3600")), ctx);
        let _ = response.into_body().collect().await.unwrap();

        assert_eq!(cache.get(&base).unwrap().unwrap().ttl_ms, 5_000);
    }

    #[tokio::test]
    async fn test_intercept_huge_max_age_keeps_config_ttl() {
        let cache = CacheHandle::with_capacity(10);
        let ctx = context(&cache);
        let base = ctx.base_key.clone();

        let response = intercept(response(Some("public, max-age=18446744073709552")), ctx);
        let _ = response.into_body().collect().await.unwrap();

        assert_eq!(cache.get(&base).unwrap().unwrap().ttl_ms, 60_000);
    }

    #[tokio::test]
    async fn test_intercept_invalidated_mid_stream_stores_nothing() {
        let cache = CacheHandle::with_capacity(10);
        let ctx = context(&cache);
        let base = ctx.base_key.clone();

        let response = intercept(response(Some("public, max-age=30")), ctx);
        cache.invalidate_by_prefix("/widgets").unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();

        assert_eq!(bytes, Bytes::from("widgets"));
        assert!(cache.get(&base).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_intercept_skips_uncacheable_response() {
        let cache = CacheHandle::with_capacity(10);
        let ctx = context(&cache);

        let response = intercept(response(None), ctx);
        assert_eq!(response.headers()[X_CACHE], "SKIP");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes, Bytes::from("widgets"));
        assert_eq!(cache.len().unwrap(), 0);
    }
}
