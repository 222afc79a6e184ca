use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod password;
pub mod rate_limit;
pub mod repository;
pub mod validation;
pub mod workflow;

// Routers segregated by allowed-role set.
pub mod routes;
use routes::{admin, authenticated, mentor, public, staff, student};

// --- Public Re-exports ---

pub use auth::TokenService;
pub use config::AppConfig;
pub use error::AppError;
pub use notify::{NotifierState, Outbox};
pub use rate_limit::RateLimits;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};
pub use workflow::Workflow;

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and `ToSchema` model into the
/// OpenAPI document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login, handlers::get_profile, handlers::update_profile,
        handlers::list_projects, handlers::get_project, handlers::create_project,
        handlers::apply_to_project, handlers::list_applications, handlers::record_progress,
        handlers::approve_project, handlers::reject_project, handlers::assign_mentor,
        handlers::list_students, handlers::add_student, handlers::update_student,
        handlers::delete_student, handlers::list_mentors, handlers::add_mentor,
        handlers::update_mentor, handlers::delete_mentor
    ),
    components(
        schemas(
            models::Role, models::ProjectStatus, models::ApplicationStatus,
            models::Student, models::Mentor, models::AdminProfile, models::Profile,
            models::Project, models::Submission, models::ProgressUpdate, models::ApplicationView,
            models::LoginRequest, models::LoginResponse, models::CreateProjectRequest,
            models::AssignMentorRequest, models::ProgressRequest, models::AddStudentRequest,
            models::UpdateStudentRequest, models::AddMentorRequest, models::UpdateMentorRequest,
            models::UpdateProfileRequest,
            error::FieldError, error::ValidationErrorBody, error::MessageBody,
        )
    ),
    tags(
        (name = "mentor-portal", description = "Student / mentor project portal API")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// The single, cheaply cloneable container shared by every request: the
/// persistence layer, the notification outbox, the workflow engine built on
/// both, the token service, the rate limiters and the loaded configuration.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub outbox: Outbox,
    pub workflow: Workflow,
    pub tokens: TokenService,
    pub limits: RateLimits,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the derived services (outbox, tokens, limiters, workflow) from
    /// the configuration and the two injected collaborators.
    pub fn new(repo: RepositoryState, notifier: NotifierState, config: AppConfig) -> Self {
        let outbox = Outbox::new(notifier);
        Self {
            workflow: Workflow::new(repo.clone(), outbox.clone()),
            tokens: TokenService::new(&config.jwt_secret),
            limits: RateLimits::new(&config.rate_limit),
            repo,
            outbox,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for TokenService {
    fn from_ref(app_state: &AppState) -> TokenService {
        app_state.tokens.clone()
    }
}

impl FromRef<AppState> for RateLimits {
    fn from_ref(app_state: &AppState) -> RateLimits {
        app_state.limits.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the role-grouped routers, each behind the guard for its
/// allowed-role set, then applies rate limiting and the observability stack.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Route groups. Paths shared between groups (e.g. GET vs POST /projects)
    // merge into one method router; each method keeps its own guard.
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            public::login_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit::limit_login)),
        )
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_any_role)),
        )
        .merge(
            staff::staff_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_staff)),
        )
        .merge(
            student::student_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_student)),
        )
        .merge(
            mentor::mentor_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_mentor)),
        )
        .merge(
            admin::admin_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin)),
        )
        // 3. Global per-caller quota, checked before any guard.
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit::limit_global))
        .with_state(state);

    // 4. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for `TraceLayer`: method, uri and the generated `x-request-id`, so every
/// log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
