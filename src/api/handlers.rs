//! API Handlers
//!
//! Administrative cache endpoints plus the demo widget routes that sit behind
//! the response cache.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use tracing::{info, warn};

use crate::cache::{CacheHandle, CacheStore};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::middleware::ResponseCacheState;
use crate::models::{
    ClearResponse, HealthResponse, InvalidateRequest, InvalidateResponse, StatsResponse,
    WidgetRequest, WidgetResponse,
};

/// `Cache-Control` announced by the widget read routes.
pub const WIDGET_CACHE_CONTROL: &str = "public, max-age=60";

/// Path prefix invalidated after any widget mutation.
pub const WIDGET_PREFIX: &str = "/widgets";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Shared response store
    pub cache: CacheHandle,
    /// State for the response cache middleware
    pub response_cache: ResponseCacheState,
    /// Demo widget storage
    pub widgets: Arc<RwLock<BTreeMap<u64, String>>>,
}

impl AppState {
    /// Creates a new AppState around the given response cache state.
    pub fn new(response_cache: ResponseCacheState) -> Self {
        Self {
            cache: response_cache.cache.clone(),
            response_cache,
            widgets: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(config: &Config) -> Self {
        let cache = CacheHandle::new(CacheStore::new(config.max_entries));
        Self::new(ResponseCacheState::from_config(cache, config))
    }
}

/// Handler for GET /widgets
pub async fn list_widgets_handler(State(state): State<AppState>) -> impl IntoResponse {
    let widgets = state.widgets.read().await;
    let body: Vec<WidgetResponse> = widgets
        .iter()
        .map(|(id, name)| WidgetResponse::new(*id, name.clone()))
        .collect();

    ([(header::CACHE_CONTROL, WIDGET_CACHE_CONTROL)], Json(body))
}

/// Handler for GET /widgets/:id
pub async fn get_widget_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse> {
    let widgets = state.widgets.read().await;
    let name = widgets
        .get(&id)
        .ok_or_else(|| CacheError::NotFound(format!("widget {}", id)))?;

    Ok((
        [(header::CACHE_CONTROL, WIDGET_CACHE_CONTROL)],
        Json(WidgetResponse::new(id, name.clone())),
    ))
}

/// Handler for PUT /widgets/:id
///
/// Write path: commits the change, then drops every cached widget response.
pub async fn put_widget_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<WidgetRequest>,
) -> Result<Json<WidgetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    {
        let mut widgets = state.widgets.write().await;
        widgets.insert(id, req.name.clone());
    }

    match state.cache.invalidate_by_prefix(WIDGET_PREFIX) {
        Ok(removed) => info!(removed, prefix = WIDGET_PREFIX, "widget cache invalidated"),
        Err(err) => warn!(error = %err, "widget cache invalidation failed"),
    }

    Ok(Json(WidgetResponse::new(id, req.name)))
}

/// Handler for GET /admin/cache/stats
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let stats = state.cache.stats()?;
    Ok(Json(StatsResponse::from(stats)))
}

/// Handler for DELETE /admin/cache
pub async fn clear_cache_handler(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    let removed = state.cache.clear()?;
    info!(removed, "response cache cleared");
    Ok(Json(ClearResponse::new(removed)))
}

/// Handler for POST /admin/cache/invalidate
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let removed = state.cache.invalidate_by_prefix(&req.prefix)?;
    info!(removed, prefix = %req.prefix, "response cache invalidated");
    Ok(Json(InvalidateResponse::new(req.prefix, removed)))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
