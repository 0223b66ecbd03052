//! API Routes
//!
//! Configures the Axum router: widget routes behind the response cache,
//! administrative routes outside it.

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_cache_handler, get_widget_handler, health_handler, invalidate_handler,
    list_widgets_handler, put_widget_handler, stats_handler, AppState,
};
use crate::middleware::response_cache_middleware;

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /widgets` - List widgets (cacheable)
/// - `GET /widgets/:id` - Fetch one widget (cacheable)
/// - `PUT /widgets/:id` - Upsert a widget, invalidating cached widget responses
/// - `GET /admin/cache/stats` - Cache statistics
/// - `DELETE /admin/cache` - Flush the cache
/// - `POST /admin/cache/invalidate` - Invalidate by path prefix
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - Response cache: widget routes only
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let cached = Router::new()
        .route("/widgets", get(list_widgets_handler))
        .route(
            "/widgets/:id",
            get(get_widget_handler).put(put_widget_handler),
        )
        .layer(middleware::from_fn_with_state(
            state.response_cache.clone(),
            response_cache_middleware,
        ));

    let admin = Router::new()
        .route("/health", get(health_handler))
        .route("/admin/cache", delete(clear_cache_handler))
        .route("/admin/cache/stats", get(stats_handler))
        .route("/admin/cache/invalidate", post(invalidate_handler));

    cached
        .merge(admin)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        create_router(AppState::from_config(&Config::default()))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-cache").is_none());
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/cache/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_widgets_endpoint_is_cached() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/widgets")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "MISS");
    }

    #[tokio::test]
    async fn test_missing_widget_not_found() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/widgets/404")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-cache"], "SKIP");
    }
}
