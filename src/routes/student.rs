use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Student Router Module
pub fn student_routes() -> Router<AppState> {
    Router::new()
        // POST /projects/{id}/apply
        // Only approved projects accept applications; each student applies once.
        .route("/projects/{id}/apply", post(handlers::apply_to_project))
        // GET /applications
        .route("/applications", get(handlers::list_applications))
}
