pub mod health;
pub mod terminal;
pub mod workspaces;

use crate::{auth::auth_middleware, state::AppState};
use axum::{
    http::{HeaderValue, Method},
    middleware, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the router. `cors_origin` restricts browser access to the frontend;
/// without it CORS is permissive for local development.
pub fn create_app(state: AppState, cors_origin: Option<&str>) -> anyhow::Result<Router> {
    let cors = match cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>()?)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::OPTIONS,
            ])
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    let workspace_routes = workspaces::routes()
        .merge(terminal::routes())
        .layer(middleware::from_fn(auth_middleware));

    let app = Router::new()
        .merge(health::routes()) // Health routes don't need auth
        .nest("/api/workspaces", workspace_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}
