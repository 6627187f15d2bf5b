//! Typed operations against the DDI authority
//!
//! All WAPI object names, return fields and paging conventions live here;
//! the transport concerns are handled by [`WapiClient`].

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::wapi::{ApiRequest, ClientError, WapiClient};
use crate::models::{AttributeDefinition, AuthorityNetwork, NetworkView, WriteOperation};

const NETWORK_RETURN_FIELDS: &str = "network,network_view,comment,extattrs";
const VIEW_RETURN_FIELDS: &str = "name,comment";
const ATTRIBUTE_RETURN_FIELDS: &str = "name,type,comment,list_values";

/// One page of a `_return_as_object` listing
#[derive(Debug, Deserialize)]
struct Page<T> {
    result: Vec<T>,
    #[serde(default)]
    next_page_id: Option<String>,
}

/// DDI authority operations
#[derive(Clone)]
pub struct AuthorityClient {
    client: Arc<WapiClient>,
    page_size: usize,
}

impl AuthorityClient {
    pub fn new(client: Arc<WapiClient>, page_size: usize) -> Self {
        Self {
            client,
            page_size: page_size.max(1),
        }
    }

    pub fn wapi(&self) -> &Arc<WapiClient> {
        &self.client
    }

    /// Cheap connectivity check against the grid object
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.client
            .send(&ApiRequest::get("grid").with_query("_return_fields", "name"))
            .await
            .map(|_| ())
    }

    pub async fn list_network_views(&self) -> Result<Vec<NetworkView>, ClientError> {
        let request =
            ApiRequest::get("networkview").with_query("_return_fields", VIEW_RETURN_FIELDS);
        decode(self.client.send(&request).await?)
    }

    pub async fn list_attribute_definitions(&self) -> Result<Vec<AttributeDefinition>, ClientError> {
        let request = ApiRequest::get("extensibleattributedef")
            .with_query("_return_fields", ATTRIBUTE_RETURN_FIELDS);
        decode(self.client.send(&request).await?)
    }

    /// Create one attribute definition, returning its reference
    pub async fn create_attribute_definition(
        &self,
        definition: &AttributeDefinition,
    ) -> Result<String, ClientError> {
        let reference = self
            .client
            .send(&attribute_definition_request(definition))
            .await?;
        info!(attribute = %definition.name, "Created extensible attribute definition");
        reference_of(reference)
    }

    /// Create several attribute definitions concurrently; results keep input order
    pub async fn create_attribute_definitions(
        &self,
        definitions: &[AttributeDefinition],
    ) -> Vec<Result<String, ClientError>> {
        let requests: Vec<ApiRequest> = definitions
            .iter()
            .map(attribute_definition_request)
            .collect();
        self.client
            .batch(&requests)
            .await
            .into_iter()
            .map(|result| result.and_then(reference_of))
            .collect()
    }

    /// All networks, optionally restricted to one view, following pages
    pub async fn list_networks(&self, view: Option<&str>) -> Result<Vec<AuthorityNetwork>, ClientError> {
        let mut networks = Vec::new();
        let mut page_id: Option<String> = None;

        loop {
            let mut request = ApiRequest::get("network")
                .with_query("_return_fields", NETWORK_RETURN_FIELDS)
                .with_query("_paging", "1")
                .with_query("_return_as_object", "1")
                .with_query("_max_results", self.page_size.to_string());
            if let Some(view) = view {
                request = request.with_query("network_view", view);
            }
            if let Some(ref id) = page_id {
                request = request.with_query("_page_id", id.clone());
            }

            let page: Page<AuthorityNetwork> = decode(self.client.send(&request).await?)?;
            debug!(
                view = view.unwrap_or("*"),
                fetched = page.result.len(),
                "Fetched network page"
            );
            networks.extend(page.result);

            match page.next_page_id {
                Some(next) if !next.is_empty() => page_id = Some(next),
                _ => break,
            }
        }

        Ok(networks)
    }

    pub async fn create_network(
        &self,
        cidr: &str,
        network_view: &str,
        comment: Option<&str>,
        attributes: &BTreeMap<String, String>,
    ) -> Result<String, ClientError> {
        let mut body = Map::new();
        body.insert("network".to_string(), json!(cidr));
        body.insert("network_view".to_string(), json!(network_view));
        if let Some(comment) = comment.filter(|c| !c.trim().is_empty()) {
            body.insert("comment".to_string(), json!(comment));
        }
        if !attributes.is_empty() {
            body.insert("extattrs".to_string(), extattrs(attributes));
        }

        let reference = self
            .client
            .send(&ApiRequest::post("network", Value::Object(body)))
            .await?;
        reference_of(reference)
    }

    /// Set attributes on an existing network, leaving other attributes intact
    pub async fn update_network(
        &self,
        reference: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<String, ClientError> {
        let body = json!({ "extattrs+": extattrs(attributes) });
        let result = self.client.send(&ApiRequest::put(reference, body)).await?;
        reference_of(result)
    }

    /// Apply one write operation
    pub async fn apply(&self, operation: &WriteOperation) -> Result<String, ClientError> {
        match operation {
            WriteOperation::Create {
                cidr,
                network_view,
                comment,
                attributes,
            } => {
                self.create_network(
                    &cidr.to_string(),
                    network_view,
                    comment.as_deref(),
                    attributes,
                )
                .await
            }
            WriteOperation::Update {
                reference,
                attributes,
                ..
            } => self.update_network(reference, attributes).await,
        }
    }
}

fn attribute_definition_request(definition: &AttributeDefinition) -> ApiRequest {
    let mut body = json!({
        "name": definition.name,
        "type": definition.attribute_type,
        "comment": definition.comment.clone().unwrap_or_default(),
    });
    if !definition.list_values.is_empty() {
        body["list_values"] = json!(definition.list_values);
    }
    ApiRequest::post("extensibleattributedef", body)
}

fn extattrs(attributes: &BTreeMap<String, String>) -> Value {
    Value::Object(
        attributes
            .iter()
            .map(|(name, value)| (name.clone(), json!({ "value": value })))
            .collect(),
    )
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value)
        .map_err(|e| ClientError::InvalidResponse(format!("failed to decode response: {}", e)))
}

/// Writes return the object reference as a bare JSON string
fn reference_of(value: Value) -> Result<String, ClientError> {
    match value {
        Value::String(reference) => Ok(reference),
        other => Err(ClientError::InvalidResponse(format!(
            "expected an object reference, got {}",
            other
        ))),
    }
}
