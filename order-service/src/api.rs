use axum::{
    extract::{Path, State},
    http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use shared::Order;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::cache::{CacheStats, OrderCache};
use crate::store::{OrderStore, StoreError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

static CACHE_HEADER: HeaderName = HeaderName::from_static("cache");
static SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub cache: Arc<OrderCache>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/orders/", get(missing_order_id))
        .route("/api/orders/:id", get(get_order))
        .route("/debug/cache", get(cache_stats))
        .route("/healthz", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Cache first; on a miss the store is consulted and a found order is cached.
/// Absence is never cached.
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(HeaderMap, Json<Order>), ApiError> {
    if id.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "missing id"));
    }

    let mut headers = HeaderMap::new();

    if let Some(order) = state.cache.get(&id) {
        headers.insert(CACHE_HEADER.clone(), HeaderValue::from_static("HIT"));
        headers.insert(SERVER_TIMING.clone(), HeaderValue::from_static("cache;desc=\"hit\";dur=0"));
        return Ok((headers, Json(order)));
    }

    let started = Instant::now();
    match state.store.get_by_id(&id).await {
        Ok(Some(order)) => {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            state.cache.set(order.clone());

            headers.insert(CACHE_HEADER.clone(), HeaderValue::from_static("MISS"));
            if let Ok(timing) = HeaderValue::from_str(&format!("db;dur={:.1}", elapsed_ms)) {
                headers.insert(SERVER_TIMING.clone(), timing);
            }
            Ok((headers, Json(order)))
        }
        Ok(None) => Err(error_response(StatusCode::NOT_FOUND, "order not found")),
        Err(StoreError::Timeout(limit)) => {
            tracing::error!("Lookup of order {} timed out after {:?}", id, limit);
            Err(error_response(StatusCode::GATEWAY_TIMEOUT, "store timeout"))
        }
        Err(e) => {
            tracing::error!("Lookup of order {} failed: {}", id, e);
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, "server error"))
        }
    }
}

pub async fn missing_order_id() -> ApiError {
    error_response(StatusCode::BAD_REQUEST, "missing id")
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

pub async fn health_check() -> &'static str {
    "ok"
}
