use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Admin Router Module
///
/// Project decisions, mentor assignment and account provisioning. Every route
/// here sits behind the admin-only guard.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // --- Workflow ---
        // PUT /projects/{id}/approve, /reject
        // Only legal while the project is pending; applicants are notified.
        .route("/projects/{id}/approve", put(handlers::approve_project))
        .route("/projects/{id}/reject", put(handlers::reject_project))
        // PUT /projects/{id}/assign-mentor
        // Allowed in any status.
        .route("/projects/{id}/assign-mentor", put(handlers::assign_mentor))
        // --- Students ---
        .route("/students", get(handlers::list_students))
        .route("/add-student", post(handlers::add_student))
        .route("/update-student/{id}", put(handlers::update_student))
        .route("/delete-student/{id}", delete(handlers::delete_student))
        // --- Mentors ---
        .route("/mentors", get(handlers::list_mentors))
        .route("/add-mentor", post(handlers::add_mentor))
        .route("/update-mentor/{id}", put(handlers::update_mentor))
        .route("/delete-mentor/{id}", delete(handlers::delete_mentor))
}
