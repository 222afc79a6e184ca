/// Router Module Index
///
/// One router per access group. `create_router` wraps each group (except
/// `public`) in the guard middleware for its allowed-role set, so a handler is
/// only reachable once the caller's role has been checked.

/// Unauthenticated routes: liveness and login.
pub mod public;

/// Any signed-in role.
pub mod authenticated;

/// Admin and mentor.
pub mod staff;

/// Student only.
pub mod student;

/// Mentor only.
pub mod mentor;

/// Admin only: workflow decisions and account provisioning.
pub mod admin;
