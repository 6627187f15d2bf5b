//! Mock services for testing
//!
//! Provides a mock DDI authority built on wiremock so tests run without a
//! real grid.

use serde_json::{json, Value};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{attribute_definitions, network_views, wapi_path, WAPI_VERSION};

/// Mock DDI authority
pub struct MockAuthority {
    pub server: MockServer,
}

impl MockAuthority {
    /// Start an empty mock authority
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Start a mock authority serving the fixture schema and the given networks
    pub async fn with_networks(networks: Value) -> Self {
        let authority = Self::start().await;
        authority.serve_views(network_views()).await;
        authority.serve_attributes(attribute_definitions()).await;
        authority.serve_networks(networks).await;
        authority.accept_writes().await;
        authority
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    pub async fn serve_views(&self, views: Value) {
        Mock::given(method("GET"))
            .and(path(wapi_path("networkview")))
            .respond_with(ResponseTemplate::new(200).set_body_json(views))
            .mount(&self.server)
            .await;
    }

    pub async fn serve_attributes(&self, definitions: Value) {
        Mock::given(method("GET"))
            .and(path(wapi_path("extensibleattributedef")))
            .respond_with(ResponseTemplate::new(200).set_body_json(definitions))
            .mount(&self.server)
            .await;
    }

    /// Serve every network as a single page
    pub async fn serve_networks(&self, networks: Value) {
        Mock::given(method("GET"))
            .and(path(wapi_path("network")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": networks })))
            .mount(&self.server)
            .await;
    }

    pub async fn serve_grid(&self) {
        Mock::given(method("GET"))
            .and(path(wapi_path("grid")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"_ref": "grid/b25l:Infoblox"}])),
            )
            .mount(&self.server)
            .await;
    }

    /// Accept network creates and updates, answering with object references
    pub async fn accept_writes(&self) {
        Mock::given(method("POST"))
            .and(path(wapi_path("network")))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!("network/bmV3:created")))
            .mount(&self.server)
            .await;

        Mock::given(method("PUT"))
            .and(path_regex(format!(r"^/wapi/v{}/network/.+", WAPI_VERSION.replace('.', r"\."))))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("network/dXBk:updated")))
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path(wapi_path("extensibleattributedef")))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!("extensibleattributedef/bmV3:new")),
            )
            .mount(&self.server)
            .await;
    }

    /// Requests the authority has seen with the given method and path prefix
    pub async fn requests_to(&self, http_method: &str, prefix: &str) -> Vec<wiremock::Request> {
        let full = wapi_path(prefix);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == http_method && r.url.path().starts_with(&full))
            .collect()
    }
}
