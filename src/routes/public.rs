use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a token.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers and orchestration.
        .route("/health", get(|| async { "ok" }))
}

/// Login Router
///
/// Kept apart from `public_routes` so the tighter login quota can be applied
/// to these routes only.
pub fn login_routes() -> Router<AppState> {
    Router::new()
        // POST /login/{admin|student|mentor}
        .route("/login/{role}", post(handlers::login))
}
