//! Attribute mapping suggestion endpoints

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use validator::Validate;

use crate::{
    models::{distinct_tags, AttributeMapping, NetworkRecord, TagSuggestions},
    utils::{AppError, AppResult},
    AppState,
};

/// Create routes for mapping endpoints
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/suggest", post(suggest))
        .route("/propose", post(propose))
}

/// Tags to map; tags found on `records` are added after the explicit ones
#[derive(Debug, Deserialize, Validate)]
pub struct SuggestRequest {
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub tags: Vec<String>,
    #[serde(default)]
    pub records: Vec<NetworkRecord>,
    #[serde(default)]
    pub refresh: bool,
}

impl SuggestRequest {
    fn tags(&self) -> AppResult<Vec<String>> {
        self.validate()?;
        let mut tags: Vec<String> = self
            .tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        tags.extend(distinct_tags(&self.records));
        if tags.is_empty() {
            return Err(AppError::BadRequest("No tags to map".to_string()));
        }
        Ok(tags)
    }
}

#[derive(Debug, Deserialize)]
pub struct ProposeRequest {
    #[serde(flatten)]
    pub suggest: SuggestRequest,
    /// Lowest confidence accepted into the proposed mapping
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,
}

fn default_min_confidence() -> u8 {
    90
}

async fn suggest_for(state: &AppState, request: &SuggestRequest) -> AppResult<Vec<TagSuggestions>> {
    let tags = request.tags()?;
    let schema = state.authority.attribute_schema(request.refresh).await?;
    Ok(state.suggester.suggest(&tags, &schema))
}

/// Ranked authority attributes for each tag
async fn suggest(
    State(state): State<AppState>,
    Json(payload): Json<SuggestRequest>,
) -> AppResult<Json<Vec<TagSuggestions>>> {
    let suggestions = suggest_for(&state, &payload).await?;
    Ok(Json(suggestions))
}

/// A starting mapping built from the best suggestion of each tag
async fn propose(
    State(state): State<AppState>,
    Json(payload): Json<ProposeRequest>,
) -> AppResult<Json<AttributeMapping>> {
    let suggestions = suggest_for(&state, &payload.suggest).await?;
    Ok(Json(AttributeMapping::from_suggestions(
        &suggestions,
        payload.min_confidence,
    )))
}
