//! API routes and handlers
//!
//! All endpoints are mounted under `/api/v1` by the caller.

use axum::{routing::get, Router};

use crate::AppState;

mod authority;
mod cache;
mod health;
mod mappings;
mod reconcile;
mod tasks;

pub use health::*;

/// All API routes
pub fn routes() -> Router<AppState> {
    Router::new()
        // Health check endpoints
        .route("/health", get(health::health_check))
        .route("/health/detailed", get(health::health_check_detailed))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        // Authority reads and schema management
        .nest("/authority", authority::routes())
        // Mapping suggestions
        .nest("/mappings", mappings::routes())
        // Dry-run and apply
        .nest("/reconcile", reconcile::routes())
        // Background tasks
        .nest("/tasks", tasks::routes())
        .nest("/cache", cache::routes())
}
