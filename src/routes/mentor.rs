use crate::{AppState, handlers};
use axum::{Router, routing::put};

/// Mentor Router Module
///
/// The handler additionally checks that the caller is the project's assigned mentor.
pub fn mentor_routes() -> Router<AppState> {
    Router::new()
        // PUT /projects/{id}/progress
        .route("/projects/{id}/progress", put(handlers::record_progress))
}
