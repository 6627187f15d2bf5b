//! Health check endpoints
//!
//! `/health` and `/health/live` never leave the process. `/health/ready` and
//! `/health/detailed` ping the DDI authority.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use crate::{models::TaskState, AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Disabled,
}

/// Basic health response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: HealthState,
    pub version: String,
}

#[derive(Serialize)]
pub struct DetailedHealthResponse {
    pub status: HealthState,
    pub version: String,
    pub checked_at: DateTime<Utc>,
    pub components: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub authority: AuthorityHealth,
    pub cache: CacheHealth,
    pub tasks: TaskHealth,
}

#[derive(Serialize)]
pub struct AuthorityHealth {
    pub status: HealthState,
    pub url: String,
    /// Round trip of the ping, including retries
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct CacheHealth {
    pub status: HealthState,
    pub cached_entries: usize,
}

#[derive(Serialize)]
pub struct TaskHealth {
    pub pending: usize,
    pub running: usize,
    pub retained: usize,
}

/// Liveness check for load balancers; does not contact the authority
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthState::Healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Authority reachability, cache occupancy and task counts.
///
/// Answers 503 when the authority does not respond.
pub async fn health_check_detailed(
    State(state): State<AppState>,
) -> (StatusCode, Json<DetailedHealthResponse>) {
    let started = Instant::now();
    let ping = state.authority.ping().await;
    let authority = AuthorityHealth {
        status: if ping.is_ok() {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        },
        url: state.config.authority.url.clone(),
        latency_ms: started.elapsed().as_millis() as u64,
        message: ping.err().map(|e| e.to_string()),
    };

    let stats = state.authority.stats().await;
    let cache = CacheHealth {
        status: if stats.enabled {
            HealthState::Healthy
        } else {
            HealthState::Disabled
        },
        cached_entries: stats.network_views.valid_entries
            + stats.attribute_definitions.valid_entries
            + stats.networks.valid_entries,
    };

    let tasks = state.orchestrator.list().await;
    let count = |wanted: TaskState| tasks.iter().filter(|t| t.status.state() == wanted).count();
    let tasks = TaskHealth {
        pending: count(TaskState::Pending),
        running: count(TaskState::Running),
        retained: tasks.len(),
    };

    let healthy = authority.status == HealthState::Healthy;
    let response = DetailedHealthResponse {
        status: if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checked_at: Utc::now(),
        components: ComponentHealth {
            authority,
            cache,
            tasks,
        },
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}

/// Liveness probe (for Kubernetes)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe (for Kubernetes)
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.authority.ping().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
