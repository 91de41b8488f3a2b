//! Integration tests for the workspace REST endpoints

mod common;

use axum::http::StatusCode;
use common::{extract_json_body, TestClient};
use serde_json::{json, Value};

async fn create(client: &TestClient, user: &str, name: &str) -> Value {
    let response = client
        .post(
            "/api/workspaces/create",
            &json!({ "workspaceName": name }),
            Some(user),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    extract_json_body(response).await
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let client = TestClient::new().await;

    let response = client.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = extract_json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "pod-api");
}

#[tokio::test]
async fn test_requests_without_user_are_rejected() {
    let client = TestClient::new().await;

    for uri in [
        "/api/workspaces/list",
        "/api/workspaces/file-structure?path=/",
        "/api/workspaces/terminal",
    ] {
        let response = client.get(uri, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }

    let response = client
        .post(
            "/api/workspaces/create",
            &json!({ "workspaceName": "my-app" }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(client.engine.launch_count(), 0);
}

#[tokio::test]
async fn test_create_workspace() {
    let client = TestClient::new().await;

    let body = create(&client, "bob", "my-app").await;

    assert_eq!(body["name"], "my-app");
    assert_eq!(body["status"], "ACTIVE");
    assert!(body["id"].as_str().is_some());
    assert!(body["createdAt"].as_str().is_some());

    let launches = client.engine.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].name, "workspace-bob");
    assert!(client.orchestrator.find_container("bob").is_some());
}

#[tokio::test]
async fn test_create_workspace_validation() {
    let client = TestClient::new().await;

    for body in [json!({}), json!({ "workspaceName": "" }), json!({ "workspaceName": "   " })] {
        let response = client
            .post("/api/workspaces/create", &body, Some("bob"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // Owner identifiers outside the allow-list never reach the engine
    let response = client
        .post(
            "/api/workspaces/create",
            &json!({ "workspaceName": "my-app" }),
            Some("bob.smith"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(client.engine.launch_count(), 0);
}

#[tokio::test]
async fn test_duplicate_create_is_bad_request() {
    let client = TestClient::new().await;
    create(&client, "bob", "my-app").await;

    let response = client
        .post(
            "/api/workspaces/create",
            &json!({ "workspaceName": "my-app" }),
            Some("bob"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(
            "/api/workspaces/create",
            &json!({ "workspaceName": "another" }),
            Some("bob"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = extract_json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("bob"));
}

#[tokio::test]
async fn test_engine_failure_is_internal_error() {
    let client = TestClient::new().await;
    client.engine.set_fail_launch(true);

    let response = client
        .post(
            "/api/workspaces/create",
            &json!({ "workspaceName": "my-app" }),
            Some("bob"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body: Value = extract_json_body(response).await;
    assert_eq!(body, json!({ "error": "Internal server error" }));
}

#[tokio::test]
async fn test_list_is_scoped_to_caller() {
    let client = TestClient::new().await;
    create(&client, "bob", "my-app").await;
    create(&client, "alice", "hers").await;

    let response = client.get("/api/workspaces/list", Some("bob")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Vec<Value> = extract_json_body(response).await;
    assert_eq!(body.len(), 1);
    assert_eq!(body[0]["name"], "my-app");
}

#[tokio::test]
async fn test_file_round_trip() {
    let client = TestClient::new().await;

    let response = client
        .put(
            "/api/workspaces/file-content",
            &json!({ "filename": "src/index.js", "content": "console.log('hi')" }),
            Some("bob"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .put(
            "/api/workspaces/file-content",
            &json!({ "filename": "README.md", "content": "" }),
            Some("bob"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .get("/api/workspaces/file-content?filename=src/index.js", Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body, json!({ "content": "console.log('hi')" }));

    let response = client
        .get("/api/workspaces/file-structure?path=/", Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let tree: Value = extract_json_body(response).await;
    assert_eq!(
        tree,
        json!([
            { "id": "README.md", "name": "README.md", "isSelectable": true },
            { "id": "src/", "name": "src", "isSelectable": false, "children": [] }
        ])
    );

    let response = client
        .get("/api/workspaces/file-structure?path=src/", Some("bob"))
        .await;
    let tree: Value = extract_json_body(response).await;
    assert_eq!(
        tree,
        json!([{ "id": "src/index.js", "name": "index.js", "isSelectable": true }])
    );
}

#[tokio::test]
async fn test_file_errors() {
    let client = TestClient::new().await;

    let response = client
        .get("/api/workspaces/file-structure", Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .get("/api/workspaces/file-content?filename=", Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .get("/api/workspaces/file-content?filename=missing.txt", Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .get(
            "/api/workspaces/file-content?filename=../alice/secret.txt",
            Some("bob"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .put(
            "/api/workspaces/file-content",
            &json!({ "filename": "a.txt" }),
            Some("bob"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .put(
            "/api/workspaces/file-content",
            &json!({ "content": "x" }),
            Some("bob"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pause_resume_delete() {
    let client = TestClient::new().await;
    let created = create(&client, "bob", "my-app").await;
    let id = created["id"].as_str().unwrap().to_string();
    let uri = format!("/api/workspaces/update/{}", id);

    client
        .put(
            "/api/workspaces/file-content",
            &json!({ "filename": "keep.txt", "content": "saved" }),
            Some("bob"),
        )
        .await;

    let response = client
        .patch(&uri, &json!({ "status": "INACTIVE" }), Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["message"], "Workspace paused");
    assert!(client.orchestrator.find_container("bob").is_none());

    let response = client
        .patch(&uri, &json!({ "status": "ACTIVE" }), Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .get("/api/workspaces/file-content?filename=keep.txt", Some("bob"))
        .await;
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["content"], "saved");

    let response = client
        .patch(&uri, &json!({ "status": "DELETED" }), Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.get("/api/workspaces/list", Some("bob")).await;
    let body: Vec<Value> = extract_json_body(response).await;
    assert!(body.is_empty());

    // A deleted record is gone whatever the target
    let response = client
        .patch(&uri, &json!({ "status": "ACTIVE" }), Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_validation() {
    let client = TestClient::new().await;
    let created = create(&client, "bob", "my-app").await;
    let uri = format!("/api/workspaces/update/{}", created["id"].as_str().unwrap());

    let response = client.patch(&uri, &json!({}), Some("bob")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .patch(&uri, &json!({ "status": "PAUSED" }), Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // ACTIVE -> ACTIVE is not a transition
    let response = client
        .patch(&uri, &json!({ "status": "ACTIVE" }), Some("bob"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Other owners cannot see the record
    let response = client
        .patch(&uri, &json!({ "status": "DELETED" }), Some("alice"))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .patch(
            "/api/workspaces/update/does-not-exist",
            &json!({ "status": "INACTIVE" }),
            Some("bob"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
