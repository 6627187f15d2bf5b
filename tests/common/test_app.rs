//! Test application setup utilities
//!
//! Provides utilities for setting up test instances of the application
//! wired to a mock DDI authority.

use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use tower::ServiceExt;

use ddi_sync::{
    api,
    config::{AppConfig, AuthorityConfig, ClientConfig},
    models::{TaskId, TaskSnapshot},
    AppState,
};

use super::fixtures::WAPI_VERSION;
use super::mocks::MockAuthority;

/// Test application wrapper for integration testing
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    /// Create a test application talking to the given mock authority
    pub fn new(authority: &MockAuthority) -> Self {
        Self::with_config(test_config(&authority.url()))
    }

    /// Create a test application with custom configuration
    pub fn with_config(config: AppConfig) -> Self {
        let state = AppState::new(config).expect("Failed to build application state");
        let router = Router::new()
            .nest("/api/v1", api::routes())
            .with_state(state.clone());

        Self { router, state }
    }

    /// Make a GET request to the test application
    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Make a POST request with JSON body
    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> TestResponse {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Make an arbitrary request
    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Poll a task until it reaches a terminal state
    pub async fn wait_for_task(&self, id: TaskId) -> TaskSnapshot {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let snapshot = self
                    .state
                    .orchestrator
                    .status(id)
                    .await
                    .expect("task should exist");
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task did not finish in time")
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: axum::http::StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: bytes::Bytes,
}

impl TestResponse {
    /// Get the response body as a string
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Parse the response body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to parse response as JSON")
    }

    /// Assert the response status
    pub fn assert_status(&self, expected: axum::http::StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {}, got {}. Body: {}",
            expected,
            self.status,
            self.text()
        );
        self
    }

    /// Assert the response status is OK (200)
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::OK)
    }

    /// Assert the response status is Created (201)
    pub fn assert_created(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::CREATED)
    }

    /// Assert the response status is Bad Request (400)
    pub fn assert_bad_request(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::BAD_REQUEST)
    }

    /// Assert the response status is Not Found (404)
    pub fn assert_not_found(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::NOT_FOUND)
    }

    /// Assert the response status is Unprocessable Entity (422)
    pub fn assert_unprocessable(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY)
    }
}

/// Client settings that keep retries fast and never throttle
pub fn fast_client_config() -> ClientConfig {
    ClientConfig {
        requests_per_second: 1000,
        burst: 1000,
        max_attempts: 3,
        base_delay_ms: 5,
        max_delay_ms: 50,
        jitter_ms: 0,
        request_timeout_secs: 5,
        ..ClientConfig::default()
    }
}

/// Create a test configuration pointing at `authority_url`
pub fn test_config(authority_url: &str) -> AppConfig {
    AppConfig {
        authority: AuthorityConfig {
            url: authority_url.to_string(),
            username: "admin".to_string(),
            password: "infoblox".to_string(),
            wapi_version: WAPI_VERSION.to_string(),
            ..AuthorityConfig::default()
        },
        client: fast_client_config(),
        ..AppConfig::default()
    }
}
