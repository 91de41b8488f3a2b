use crate::error::ApiError;
use axum::{extract::Request, middleware::Next, response::Response};

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
}

/// Auth middleware - extracts the owner from trusted proxy headers
///
/// The session provider sits in front of pod-api and sets `x-pod-user` (or the
/// oauth2-proxy `x-forwarded-user`) after verifying the session. `x-user` is
/// accepted for local development. The username is used as the owner
/// identifier; its format is checked by the sandbox on every access.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let username = req
        .headers()
        .get("x-pod-user")
        .or_else(|| req.headers().get("x-forwarded-user"))
        .or_else(|| req.headers().get("x-user"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let username =
        username.ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;

    req.extensions_mut().insert(AuthenticatedUser { username });

    Ok(next.run(req).await)
}
