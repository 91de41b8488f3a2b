//! Common test utilities and helpers for pod-api tests
//!
//! Every test app runs against an in-memory database, a temporary storage
//! root and a recording fake container engine.

#![allow(dead_code)]

use axum::{body::Body, http::Request, Router};
use pod_api::{create_app, AppState};
use pod_orchestrator::test_utils::{test_orchestrator, FakeEngine};
use pod_orchestrator::{TerminalSettings, WorkspaceOrchestrator};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub orchestrator: Arc<WorkspaceOrchestrator>,
    pub engine: Arc<FakeEngine>,
    // Keeps the storage root alive for the duration of the test
    pub dir: TempDir,
}

impl TestClient {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let (orchestrator, engine) = test_orchestrator(dir.path()).await;
        let state = AppState::new(orchestrator.clone(), TerminalSettings::default());
        let app = create_app(state, None).expect("Failed to create test app");

        Self {
            app,
            orchestrator,
            engine,
            dir,
        }
    }

    /// Send a request to the API
    pub async fn send_request(&self, request: Request<Body>) -> axum::http::Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Send a JSON body with the given method
    pub async fn send_json<T: serde::Serialize>(
        &self,
        method: &str,
        uri: &str,
        body: &T,
        user: Option<&str>,
    ) -> axum::http::Response<Body> {
        let req_body = serde_json::to_string(body).expect("Failed to serialize request body");
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");

        if let Some(user) = user {
            builder = builder.header("x-user", user);
        }

        let request = builder.body(Body::from(req_body)).unwrap();
        self.send_request(request).await
    }

    pub async fn post<T: serde::Serialize>(
        &self,
        uri: &str,
        body: &T,
        user: Option<&str>,
    ) -> axum::http::Response<Body> {
        self.send_json("POST", uri, body, user).await
    }

    pub async fn put<T: serde::Serialize>(
        &self,
        uri: &str,
        body: &T,
        user: Option<&str>,
    ) -> axum::http::Response<Body> {
        self.send_json("PUT", uri, body, user).await
    }

    pub async fn patch<T: serde::Serialize>(
        &self,
        uri: &str,
        body: &T,
        user: Option<&str>,
    ) -> axum::http::Response<Body> {
        self.send_json("PATCH", uri, body, user).await
    }

    /// Get request to an endpoint
    pub async fn get(&self, uri: &str, user: Option<&str>) -> axum::http::Response<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);

        if let Some(user) = user {
            builder = builder.header("x-user", user);
        }

        let request = builder.body(Body::empty()).unwrap();
        self.send_request(request).await
    }
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: axum::response::Response) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}
