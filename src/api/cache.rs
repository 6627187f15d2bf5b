//! Response cache endpoints

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    services::CacheServiceStats,
    utils::{AppError, AppResult},
    AppState,
};

/// Create routes for cache endpoints
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/invalidate", post(invalidate))
}

/// Key to drop: exact, `prefix*`, or `*` for everything
#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub key: String,
    pub invalidated: usize,
}

async fn stats(State(state): State<AppState>) -> Json<CacheServiceStats> {
    Json(state.authority.stats().await)
}

async fn invalidate(
    State(state): State<AppState>,
    Json(payload): Json<InvalidateRequest>,
) -> AppResult<Json<InvalidateResponse>> {
    let key = payload.key.trim().to_string();
    if key.is_empty() {
        return Err(AppError::BadRequest("Cache key must not be empty".to_string()));
    }
    let invalidated = state.authority.invalidate(&key).await;
    info!(key = %key, invalidated, "Cache invalidated");
    Ok(Json(InvalidateResponse { key, invalidated }))
}
