use crate::{AppState, handlers};
use axum::{
    Router,
    routing::get,
};

/// Authenticated Router Module
///
/// Routes open to every role. Handlers receive the verified `Principal` and
/// scope their results by it.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET/PUT /profile
        // The caller's own account. Admins can read but not edit theirs.
        .route(
            "/profile",
            get(handlers::get_profile).put(handlers::update_profile),
        )
        // GET /projects?status=...
        // Students see approved projects, mentors their assigned ones, admins everything.
        .route("/projects", get(handlers::list_projects))
        .route("/projects/{id}", get(handlers::get_project))
}
