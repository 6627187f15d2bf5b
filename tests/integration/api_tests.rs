//! API endpoint integration tests
//!
//! Each test drives the router in-process against a mock DDI authority.

use axum::http::StatusCode;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use ddi_sync::models::TaskId;

use crate::common::*;

// ==================== Health ====================

#[tokio::test]
async fn test_health_endpoint() {
    let authority = MockAuthority::start().await;
    let app = TestApp::new(&authority);

    let response = app.get("/api/v1/health").await;
    response.assert_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_readiness_follows_authority() {
    let authority = MockAuthority::start().await;
    authority.serve_grid().await;
    let app = TestApp::new(&authority);
    app.get("/api/v1/health/ready").await.assert_ok();

    let down = TestApp::with_config(test_config("http://127.0.0.1:1"));
    down.get("/api/v1/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_detailed_health_reports_components() {
    let authority = MockAuthority::start().await;
    authority.serve_grid().await;
    let app = TestApp::new(&authority);

    let body: Value = app.get("/api/v1/health/detailed").await.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["authority"]["status"], "healthy");
    assert_eq!(body["components"]["cache"]["status"], "healthy");
}

// ==================== Authority ====================

#[tokio::test]
async fn test_network_views_are_cached() {
    let authority = MockAuthority::start().await;
    Mock::given(method("GET"))
        .and(path(wapi_path("networkview")))
        .respond_with(ResponseTemplate::new(200).set_body_json(network_views()))
        .expect(1)
        .mount(&authority.server)
        .await;
    let app = TestApp::new(&authority);

    for _ in 0..3 {
        let views: Value = app.get("/api/v1/authority/network-views").await.json();
        assert_eq!(views[0]["name"], "default");
        assert_eq!(views[1]["name"], "lab");
    }
}

#[tokio::test]
async fn test_refresh_bypasses_cache() {
    let authority = MockAuthority::start().await;
    authority.serve_views(network_views()).await;
    let app = TestApp::new(&authority);

    app.get("/api/v1/authority/network-views").await.assert_ok();
    app.get("/api/v1/authority/network-views?refresh=true")
        .await
        .assert_ok();

    assert_eq!(authority.requests_to("GET", "networkview").await.len(), 2);
}

#[tokio::test]
async fn test_authority_unreachable_is_bad_gateway() {
    let app = TestApp::with_config(test_config("http://127.0.0.1:1"));

    let response = app.get("/api/v1/authority/network-views").await;
    response.assert_status(StatusCode::BAD_GATEWAY);

    let body: Value = response.json();
    assert_eq!(body["error"], "authority_error");
    assert_eq!(body["details"]["retryable"], true);
}

#[tokio::test]
async fn test_create_attribute() {
    let authority = MockAuthority::with_networks(json!([])).await;
    let app = TestApp::new(&authority);

    let response = app
        .post_json(
            "/api/v1/authority/attributes",
            json!({"name": "Cost_Center", "type": "STRING", "comment": "Billing"}),
        )
        .await;
    response.assert_created();

    let body: Value = response.json();
    assert_eq!(body["reference"], "extensibleattributedef/bmV3:new");
    assert_eq!(body["definition"]["name"], "Cost_Center");
}

#[tokio::test]
async fn test_create_attribute_rejects_invalid_name() {
    let authority = MockAuthority::with_networks(json!([])).await;
    let app = TestApp::new(&authority);

    let response = app
        .post_json(
            "/api/v1/authority/attributes",
            json!({"name": "cost center!", "type": "STRING"}),
        )
        .await;
    response.assert_unprocessable();

    assert!(authority
        .requests_to("POST", "extensibleattributedef")
        .await
        .is_empty());
}

#[tokio::test]
async fn test_batch_create_attributes_reports_each_item() {
    let authority = MockAuthority::with_networks(json!([])).await;
    let app = TestApp::new(&authority);

    let response = app
        .post_json(
            "/api/v1/authority/attributes/batch",
            json!({"attributes": [
                {"name": "Team", "type": "STRING"},
                {"name": "Region", "type": "STRING"}
            ]}),
        )
        .await;
    response.assert_ok();

    let items: Vec<Value> = response.json();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["name"], "Team");
    assert_eq!(items[1]["name"], "Region");
    assert!(items.iter().all(|item| item["success"] == true));
}

#[tokio::test]
async fn test_empty_attribute_batch_is_rejected() {
    let authority = MockAuthority::with_networks(json!([])).await;
    let app = TestApp::new(&authority);

    let response = app
        .post_json("/api/v1/authority/attributes/batch", json!({"attributes": []}))
        .await;
    response.assert_unprocessable();

    let body: Value = response.json();
    assert_eq!(body["error"], "validation_error");
    assert!(authority
        .requests_to("POST", "extensibleattributedef")
        .await
        .is_empty());
}

// ==================== Mappings ====================

#[tokio::test]
async fn test_suggest_mappings() {
    let authority = MockAuthority::with_networks(json!([])).await;
    let app = TestApp::new(&authority);

    let response = app
        .post_json(
            "/api/v1/mappings/suggest",
            json!({"tags": ["Environment", "CostCenter", "zzz"]}),
        )
        .await;
    response.assert_ok();

    let body: Vec<Value> = response.json();
    assert_eq!(body.len(), 3);

    assert_eq!(body[0]["suggestions"][0]["authority_attribute"], "Environment");
    assert_eq!(body[0]["suggestions"][0]["reason"], "ExactMatch");
    assert_eq!(body[0]["can_create_new"], false);

    assert_eq!(body[1]["suggestions"][0]["authority_attribute"], "Cost_Center");
    assert_eq!(body[1]["suggestions"][0]["reason"], "FuzzyMatch");

    assert_eq!(body[2]["suggestions"][0]["reason"], "NoMatch");
    assert_eq!(body[2]["can_create_new"], true);
}

#[tokio::test]
async fn test_suggest_requires_tags() {
    let authority = MockAuthority::with_networks(json!([])).await;
    let app = TestApp::new(&authority);

    app.post_json("/api/v1/mappings/suggest", json!({"tags": []}))
        .await
        .assert_bad_request();
}

#[tokio::test]
async fn test_propose_mapping_keeps_confident_suggestions() {
    let authority = MockAuthority::with_networks(json!([])).await;
    let app = TestApp::new(&authority);

    let response = app
        .post_json(
            "/api/v1/mappings/propose",
            json!({"tags": ["environment", "zzz"]}),
        )
        .await;
    response.assert_ok();

    let mapping: Value = response.json();
    assert_eq!(mapping["entries"]["environment"]["attribute"], "Environment");
    assert!(mapping["entries"].get("zzz").is_none());
}

// ==================== Reconciliation ====================

#[tokio::test]
async fn test_dry_run_classifies_records() {
    let authority = MockAuthority::with_networks(scenario_authority_networks()).await;
    let app = TestApp::new(&authority);

    let response = app
        .post_json(
            "/api/v1/reconcile/dry-run",
            reconcile_body(&scenario_records(), "default", env_mapping()),
        )
        .await;
    response.assert_ok();

    let body: Value = response.json();
    assert_eq!(body["summary"]["total"], 3);
    assert_eq!(body["summary"]["new"], 1);
    assert_eq!(body["summary"]["unchanged"], 1);
    assert_eq!(body["summary"]["conflicting"], 1);

    assert_eq!(body["new"][0]["record"]["cidr"], "10.0.3.0/24");
    assert_eq!(body["existing_unchanged"][0]["record"]["cidr"], "10.0.1.0/24");

    let conflict = &body["existing_conflicting"][0];
    assert_eq!(conflict["record"]["cidr"], "10.0.2.0/24");
    assert_eq!(conflict["differences"][0]["attribute"], "Environment");
    assert_eq!(conflict["differences"][0]["authority_value"], "prod");
    assert_eq!(conflict["differences"][0]["incoming_value"], "staging");

    // Dry runs never write
    assert!(authority.requests_to("POST", "network").await.is_empty());
    assert!(authority.requests_to("PUT", "network/").await.is_empty());
}

#[tokio::test]
async fn test_dry_run_rejects_unknown_mapping_target() {
    let authority = MockAuthority::with_networks(json!([])).await;
    let app = TestApp::new(&authority);

    let response = app
        .post_json(
            "/api/v1/reconcile/dry-run",
            reconcile_body(
                &scenario_records(),
                "default",
                json!({"entries": {"env": "Stage"}}),
            ),
        )
        .await;
    response.assert_unprocessable();
    assert!(response.text().contains("Stage"));
}

#[tokio::test]
async fn test_dry_run_rejects_duplicate_cidrs() {
    let authority = MockAuthority::with_networks(json!([])).await;
    let app = TestApp::new(&authority);

    let records = vec![record("10.0.1.0/24", "prod"), record("10.0.1.0/24", "dev")];
    let response = app
        .post_json(
            "/api/v1/reconcile/dry-run",
            reconcile_body(&records, "default", env_mapping()),
        )
        .await;
    response.assert_unprocessable();

    let body: Value = response.json();
    assert_eq!(body["details"]["cidr"], "10.0.1.0/24");
    assert_eq!(body["details"]["positions"], json!([0, 1]));
}

#[tokio::test]
async fn test_dry_run_rejects_values_of_wrong_type() {
    let authority = MockAuthority::with_networks(json!([])).await;
    let app = TestApp::new(&authority);

    let records = vec![
        record("10.0.1.0/24", "100"),
        record("10.0.2.0/24", "prod"),
    ];
    let response = app
        .post_json(
            "/api/v1/reconcile/dry-run",
            reconcile_body(&records, "default", json!({"entries": {"env": "VLAN"}})),
        )
        .await;
    response.assert_unprocessable();

    let body: Value = response.json();
    let violations = body["details"].as_array().expect("violations listed");
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0]["cidr"], "10.0.2.0/24");
    assert_eq!(violations[0]["attribute"], "VLAN");
}

#[tokio::test]
async fn test_dry_run_rejects_empty_view() {
    let authority = MockAuthority::with_networks(json!([])).await;
    let app = TestApp::new(&authority);

    app.post_json(
        "/api/v1/reconcile/dry-run",
        reconcile_body(&scenario_records(), "  ", env_mapping()),
    )
    .await
    .assert_unprocessable();
}

#[tokio::test]
async fn test_apply_writes_new_and_conflicting_records() {
    let authority = MockAuthority::with_networks(scenario_authority_networks()).await;
    let app = TestApp::new(&authority);

    let response = app
        .post_json(
            "/api/v1/reconcile/apply",
            reconcile_body(&scenario_records(), "default", env_mapping()),
        )
        .await;
    response.assert_status(StatusCode::ACCEPTED);

    let body: Value = response.json();
    assert_eq!(body["total"], 2);
    let task_id: TaskId = serde_json::from_value(body["task_id"].clone()).unwrap();

    let snapshot = app.wait_for_task(task_id).await;
    let status = serde_json::to_value(&snapshot.status).unwrap();
    assert_eq!(status["state"], "Succeeded");
    assert_eq!(status["created"], 1);
    assert_eq!(status["updated"], 1);
    assert_eq!(status["failed"], 0);
    assert_eq!(snapshot.current, 2);

    let creates = authority.requests_to("POST", "network").await;
    assert_eq!(creates.len(), 1);
    let create: Value = serde_json::from_slice(&creates[0].body).unwrap();
    assert_eq!(create["network"], "10.0.3.0/24");
    assert_eq!(create["network_view"], "default");
    assert_eq!(create["extattrs"]["Environment"]["value"], "dev");

    let updates = authority.requests_to("PUT", "network/").await;
    assert_eq!(updates.len(), 1);
    let update: Value = serde_json::from_slice(&updates[0].body).unwrap();
    assert_eq!(
        update,
        json!({"extattrs+": {"Environment": {"value": "staging"}}})
    );
}

#[tokio::test]
async fn test_apply_options_skip_updates() {
    let authority = MockAuthority::with_networks(scenario_authority_networks()).await;
    let app = TestApp::new(&authority);

    let mut body = reconcile_body(&scenario_records(), "default", env_mapping());
    body["options"] = json!({"update_conflicting": false});

    let response = app.post_json("/api/v1/reconcile/apply", body).await;
    response.assert_status(StatusCode::ACCEPTED);
    let accepted: Value = response.json();
    assert_eq!(accepted["total"], 1);

    let task_id: TaskId = serde_json::from_value(accepted["task_id"].clone()).unwrap();
    app.wait_for_task(task_id).await;
    assert!(authority.requests_to("PUT", "network/").await.is_empty());
}

// ==================== Tasks ====================

#[tokio::test]
async fn test_task_lookup() {
    let authority = MockAuthority::with_networks(scenario_authority_networks()).await;
    let app = TestApp::new(&authority);

    let accepted: Value = app
        .post_json(
            "/api/v1/reconcile/apply",
            reconcile_body(&scenario_records(), "default", env_mapping()),
        )
        .await
        .json();
    let task_id: TaskId = serde_json::from_value(accepted["task_id"].clone()).unwrap();
    app.wait_for_task(task_id).await;

    let task: Value = app.get(&format!("/api/v1/tasks/{}", task_id)).await.json();
    assert_eq!(task["id"], accepted["task_id"]);
    assert_eq!(task["status"]["state"], "Succeeded");

    let tasks: Vec<Value> = app.get("/api/v1/tasks").await.json();
    assert_eq!(tasks.len(), 1);

    // Finished tasks cannot be cancelled
    app.post_json(&format!("/api/v1/tasks/{}/cancel", task_id), json!({}))
        .await
        .assert_bad_request();
}

#[tokio::test]
async fn test_finished_task_events_send_snapshot() {
    let authority = MockAuthority::with_networks(scenario_authority_networks()).await;
    let app = TestApp::new(&authority);

    let accepted: Value = app
        .post_json(
            "/api/v1/reconcile/apply",
            reconcile_body(&scenario_records(), "default", env_mapping()),
        )
        .await
        .json();
    let task_id: TaskId = serde_json::from_value(accepted["task_id"].clone()).unwrap();
    app.wait_for_task(task_id).await;

    // The stream closes after the snapshot of a finished task
    let response = app.get(&format!("/api/v1/tasks/{}/events", task_id)).await;
    response.assert_ok();
    assert_eq!(
        response.headers.get("content-type").unwrap(),
        "text/event-stream"
    );

    let text = response.text();
    assert!(text.contains("event: snapshot"));
    assert!(text.contains("\"state\":\"Succeeded\""));
    assert!(!text.contains("event: progress"));
}

#[tokio::test]
async fn test_unknown_task_not_found() {
    let authority = MockAuthority::start().await;
    let app = TestApp::new(&authority);

    app.get(&format!("/api/v1/tasks/{}", uuid::Uuid::new_v4()))
        .await
        .assert_not_found();
    app.get("/api/v1/tasks/not-a-task-id")
        .await
        .assert_bad_request();
}

// ==================== Cache ====================

#[tokio::test]
async fn test_cache_invalidate_forces_refetch() {
    let authority = MockAuthority::start().await;
    authority.serve_views(network_views()).await;
    let app = TestApp::new(&authority);

    app.get("/api/v1/authority/network-views").await.assert_ok();

    let response = app
        .post_json("/api/v1/cache/invalidate", json!({"key": "network_views"}))
        .await;
    response.assert_ok();
    let body: Value = response.json();
    assert_eq!(body["invalidated"], 1);

    app.get("/api/v1/authority/network-views").await.assert_ok();
    assert_eq!(authority.requests_to("GET", "networkview").await.len(), 2);

    let stats: Value = app.get("/api/v1/cache/stats").await.json();
    assert!(stats.is_object());
}

#[tokio::test]
async fn test_cache_invalidate_requires_key() {
    let authority = MockAuthority::start().await;
    let app = TestApp::new(&authority);

    app.post_json("/api/v1/cache/invalidate", json!({"key": " "}))
        .await
        .assert_bad_request();
}
