use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Mentor, ProgressUpdate, Project, ProjectStatus, Role, Student},
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

/// RepoError
///
/// Failures of the persistence layer. Unique violations surface as `Conflict`;
/// everything else becomes a 500 at the boundary.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{0}")]
    Conflict(String),
    #[error("referenced record does not exist: {0}")]
    MissingReference(String),
    #[error("stored data is inconsistent: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Conflict(msg) => AppError::Conflict(msg),
            RepoError::MissingReference(what) => AppError::NotFound(what),
            other => AppError::Internal(other.to_string()),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

// --- Write Models ---

/// Credentials
///
/// What the login flow needs from the credential store: the account id and
/// the stored PHC hash.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub id: Uuid,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub roll_no: String,
    pub course: String,
    pub section: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewMentor {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub technologies: Vec<String>,
}

/// StudentChanges
///
/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct StudentChanges {
    pub name: Option<String>,
    pub roll_no: Option<String>,
    pub course: Option<String>,
    pub section: Option<String>,
    pub email: Option<String>,
    pub mentor_id: Option<Uuid>,
    pub password_hash: Option<String>,
    pub profile: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct MentorChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub profile: Option<Map<String, Value>>,
}

/// ProjectFilter
///
/// Conjunctive filter for project listings. Every `None` means "any".
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
    pub mentor_id: Option<Uuid>,
    pub applicant_id: Option<Uuid>,
}

// --- Atomic Workflow Outcomes ---

/// Result of `set_project_mentor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned { previous: Option<Uuid> },
    ProjectMissing,
    MentorMissing,
}

/// Result of `add_applicant`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Added,
    AlreadyApplied,
    /// The project is not in the status applications require.
    StatusMismatch(ProjectStatus),
    ProjectMissing,
    StudentMissing,
}

/// Result of `append_progress`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressOutcome {
    Recorded,
    ProjectMissing,
    /// The acting mentor is not the project's mentor.
    NotAssigned,
    /// The student has not applied to the project.
    NotApplied,
}

/// Repository Trait
///
/// Abstract contract for all persistence operations. Handlers and the workflow
/// engine only ever see `Arc<dyn Repository>`.
///
/// Every method under "Workflow writes" is one atomic unit: its precondition
/// checks and all of its writes succeed or fail together, so a relation is
/// never left one-sided.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Credentials ---
    // `None` for unknown emails and for the admin role, which is not stored.
    async fn find_credentials(&self, role: Role, email: &str) -> RepoResult<Option<Credentials>>;

    // --- Students ---
    async fn create_student(&self, new: NewStudent) -> RepoResult<Student>;
    async fn get_student(&self, id: Uuid) -> RepoResult<Option<Student>>;
    async fn list_students(&self) -> RepoResult<Vec<Student>>;
    async fn update_student(&self, id: Uuid, changes: StudentChanges) -> RepoResult<Option<Student>>;
    // Cascades: the student's applications go with it.
    async fn delete_student(&self, id: Uuid) -> RepoResult<bool>;

    // --- Mentors ---
    async fn create_mentor(&self, new: NewMentor) -> RepoResult<Mentor>;
    async fn get_mentor(&self, id: Uuid) -> RepoResult<Option<Mentor>>;
    async fn list_mentors(&self) -> RepoResult<Vec<Mentor>>;
    async fn update_mentor(&self, id: Uuid, changes: MentorChanges) -> RepoResult<Option<Mentor>>;
    // Cascades: project and student mentor references are cleared.
    async fn delete_mentor(&self, id: Uuid) -> RepoResult<bool>;

    // --- Projects ---
    async fn create_project(&self, new: NewProject) -> RepoResult<Project>;
    async fn get_project(&self, id: Uuid) -> RepoResult<Option<Project>>;
    // Newest first.
    async fn list_projects(&self, filter: ProjectFilter) -> RepoResult<Vec<Project>>;

    // --- Workflow writes ---

    /// Compare-and-set on `status`: only writes when the stored status is still
    /// `from`. `None` when the project is missing or its status moved.
    async fn transition_status(
        &self,
        id: Uuid,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> RepoResult<Option<Project>>;

    async fn set_project_mentor(&self, project_id: Uuid, mentor_id: Uuid) -> RepoResult<AssignOutcome>;

    async fn add_applicant(
        &self,
        project_id: Uuid,
        student_id: Uuid,
        required_status: ProjectStatus,
    ) -> RepoResult<ApplyOutcome>;

    async fn append_progress(
        &self,
        project_id: Uuid,
        mentor_id: Uuid,
        student_id: Uuid,
        files: Vec<String>,
        update: ProgressUpdate,
    ) -> RepoResult<ProgressOutcome>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;
