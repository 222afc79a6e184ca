use crate::{AppState, handlers};
use axum::{Router, routing::post};

/// Staff Router Module
///
/// Routes shared by admins and mentors.
pub fn staff_routes() -> Router<AppState> {
    Router::new()
        // POST /projects
        // New projects start pending with no mentor.
        .route("/projects", post(handlers::create_project))
}
