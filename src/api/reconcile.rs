//! Reconciliation endpoints: dry-run classification and apply

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use validator::Validate;

use crate::{
    models::{
        ApplyOptions, AttributeMapping, ClassificationResult, ClassificationSummary,
        NetworkRecord, TaskId, WriteSet,
    },
    services::{check_record_limit, classify, validate_values, SubmitOptions},
    utils::AppResult,
    AppState,
};

/// Create routes for reconciliation endpoints
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/dry-run", post(dry_run))
        .route("/apply", post(apply))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReconcileRequest {
    pub records: Vec<NetworkRecord>,
    #[validate(length(max = 256))]
    pub network_view: String,
    #[serde(default)]
    pub mapping: AttributeMapping,
    /// Bypass cached authority state
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    #[serde(flatten)]
    pub reconcile: ReconcileRequest,
    #[serde(default)]
    pub options: ApplyOptions,
    /// Overall task deadline; the configured default applies when absent
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct DryRunResponse {
    pub summary: ClassificationSummary,
    #[serde(flatten)]
    pub classification: ClassificationResult,
}

#[derive(Debug, Serialize)]
pub struct ApplyResponse {
    pub task_id: TaskId,
    pub total: usize,
    pub summary: ClassificationSummary,
}

/// Validate the request and classify it against current authority state
async fn plan(state: &AppState, request: ReconcileRequest) -> AppResult<ClassificationResult> {
    request.validate()?;
    check_record_limit(request.records.len(), state.config.reconcile.max_records)?;

    let schema = state.authority.attribute_schema(request.refresh).await?;
    let mapping = request.mapping.freeze(&schema)?;
    validate_values(&request.records, &mapping, &schema)?;

    let networks = state.authority.networks(None, request.refresh).await?;
    Ok(classify(
        &request.records,
        &mapping,
        &request.network_view,
        &networks,
    )?)
}

/// Classify records without writing anything
async fn dry_run(
    State(state): State<AppState>,
    Json(payload): Json<ReconcileRequest>,
) -> AppResult<Json<DryRunResponse>> {
    let classification = plan(&state, payload).await?;
    Ok(Json(DryRunResponse {
        summary: classification.summary(),
        classification,
    }))
}

/// Classify, then write new and conflicting records in a background task
async fn apply(
    State(state): State<AppState>,
    Json(payload): Json<ApplyRequest>,
) -> AppResult<(StatusCode, Json<ApplyResponse>)> {
    let options = payload.options;
    let timeout = payload.timeout_secs.map(Duration::from_secs);

    let classification = plan(&state, payload.reconcile).await?;
    let write_set = WriteSet::from_classification(&classification, options);
    let total = write_set.len();

    let task_id = state
        .orchestrator
        .submit(write_set, SubmitOptions { timeout })
        .await?;
    info!(
        task_id = %task_id,
        view = %classification.network_view,
        total,
        "Reconciliation submitted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(ApplyResponse {
            task_id,
            total,
            summary: classification.summary(),
        }),
    ))
}
