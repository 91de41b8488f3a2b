//! Integration tests for authentication middleware
//!
//! The owner of every request comes from trusted proxy headers.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware,
    routing::get,
    Router,
};
use pod_api::auth::{auth_middleware, AuthenticatedUser};
use tower::ServiceExt; // for `oneshot`

async fn echo_user(
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "username": user.username,
    }))
}

fn create_test_app() -> Router {
    Router::new()
        .route("/protected", get(echo_user))
        .layer(middleware::from_fn(auth_middleware))
}

async fn send(headers: &[(&str, &str)]) -> axum::response::Response {
    let mut builder = Request::builder().uri("/protected");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    create_test_app()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_x_user_header_passes() {
    let response = send(&[("x-user", "testuser")]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["username"], "testuser");
}

#[tokio::test]
async fn test_proxy_headers_take_precedence() {
    let response = send(&[
        ("x-user", "local"),
        ("x-forwarded-user", "forwarded"),
        ("x-pod-user", "poduser"),
    ])
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["username"], "poduser");

    let response = send(&[("x-user", "local"), ("x-forwarded-user", "forwarded")]).await;
    let json = json_body(response).await;
    assert_eq!(json["username"], "forwarded");
}

#[tokio::test]
async fn test_missing_user_is_unauthorized() {
    let response = send(&[]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = json_body(response).await;
    assert_eq!(json["error"], "Authentication required");
}

#[tokio::test]
async fn test_blank_user_is_unauthorized() {
    let response = send(&[("x-user", "   ")]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
