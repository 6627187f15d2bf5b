//! DDI authority read and schema endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    models::{AttributeDefinition, AttributeType, AuthorityNetwork, EnumValue, NetworkView},
    utils::{validation::check_attribute_name, AppResult, ValidationError},
    AppState,
};

/// Create routes for authority endpoints
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/network-views", get(list_network_views))
        .route("/attributes", get(list_attributes).post(create_attribute))
        .route("/attributes/batch", post(create_attributes))
        .route("/networks", get(list_networks))
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct NetworksQuery {
    pub view: Option<String>,
    #[serde(default)]
    pub refresh: bool,
}

/// Request to define a new extensible attribute
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAttributeRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[serde(rename = "type", default)]
    pub attribute_type: AttributeType,
    #[validate(length(max = 256))]
    pub comment: Option<String>,
    /// Allowed values for ENUM attributes
    #[serde(default)]
    pub list_values: Vec<String>,
}

impl CreateAttributeRequest {
    fn into_definition(self) -> AppResult<AttributeDefinition> {
        self.validate()?;
        check_attribute_name(&self.name).map_err(|reason| ValidationError::InvalidAttributeName {
            name: self.name.clone(),
            reason,
        })?;

        let mut definition = AttributeDefinition::new(self.name, self.attribute_type);
        definition.comment = self.comment;
        definition.list_values = self
            .list_values
            .into_iter()
            .map(|value| EnumValue { value })
            .collect();
        Ok(definition)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct BatchCreateAttributesRequest {
    #[validate(length(min = 1, max = 100))]
    pub attributes: Vec<CreateAttributeRequest>,
}

#[derive(Debug, Serialize)]
pub struct CreatedAttribute {
    pub reference: String,
    pub definition: AttributeDefinition,
}

/// Outcome of one definition in a batch
#[derive(Debug, Serialize)]
pub struct BatchItemResult {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn list_network_views(
    State(state): State<AppState>,
    Query(query): Query<RefreshQuery>,
) -> AppResult<Json<Vec<NetworkView>>> {
    let views = state.authority.network_views(query.refresh).await?;
    Ok(Json(views))
}

async fn list_attributes(
    State(state): State<AppState>,
    Query(query): Query<RefreshQuery>,
) -> AppResult<Json<Vec<AttributeDefinition>>> {
    let definitions = state.authority.attribute_definitions(query.refresh).await?;
    Ok(Json(definitions))
}

async fn create_attribute(
    State(state): State<AppState>,
    Json(payload): Json<CreateAttributeRequest>,
) -> AppResult<(StatusCode, Json<CreatedAttribute>)> {
    let definition = payload.into_definition()?;
    let reference = state
        .authority
        .create_attribute_definition(&definition)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedAttribute {
            reference,
            definition,
        }),
    ))
}

/// Create several definitions; every name is checked before any is sent
async fn create_attributes(
    State(state): State<AppState>,
    Json(payload): Json<BatchCreateAttributesRequest>,
) -> AppResult<Json<Vec<BatchItemResult>>> {
    payload.validate()?;
    let definitions = payload
        .attributes
        .into_iter()
        .map(CreateAttributeRequest::into_definition)
        .collect::<AppResult<Vec<_>>>()?;

    let results = state
        .authority
        .create_attribute_definitions(&definitions)
        .await;

    let items = definitions
        .iter()
        .zip(results)
        .map(|(definition, result)| match result {
            Ok(reference) => BatchItemResult {
                name: definition.name.clone(),
                success: true,
                reference: Some(reference),
                error: None,
            },
            Err(e) => BatchItemResult {
                name: definition.name.clone(),
                success: false,
                reference: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    Ok(Json(items))
}

async fn list_networks(
    State(state): State<AppState>,
    Query(query): Query<NetworksQuery>,
) -> AppResult<Json<Vec<AuthorityNetwork>>> {
    let view = query.view.as_deref().map(str::trim).filter(|v| !v.is_empty());
    let networks = state.authority.networks(view, query.refresh).await?;
    Ok(Json(networks))
}
