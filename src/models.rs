use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Enumerations ---

/// Role
///
/// The three actor roles. Embedded in every identity token and matched against
/// a route group's allowed-role set by the access guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    Admin,
    Mentor,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Mentor => "mentor",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ProjectStatus
///
/// Lifecycle state of a project. `Pending` is the initial state; the legal
/// transitions out of it live in `crate::workflow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ProjectStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Pending => "pending",
            ProjectStatus::Approved => "approved",
            ProjectStatus::Rejected => "rejected",
            ProjectStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProjectStatus::Pending),
            "approved" => Ok(ProjectStatus::Approved),
            "rejected" => Ok(ProjectStatus::Rejected),
            "completed" => Ok(ProjectStatus::Completed),
            other => Err(format!("unknown project status '{other}'")),
        }
    }
}

/// ApplicationStatus
///
/// Per-project entry of a student's status map. Advanced by the mentor's
/// progress updates, never by the student.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, TS, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ApplicationStatus {
    #[default]
    Applied,
    InProgress,
    Completed,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::InProgress => "in_progress",
            ApplicationStatus::Completed => "completed",
        }
    }

    /// Status reached after a progress update reporting `percentage`.
    /// Never moves backwards: a completed application stays completed.
    pub fn advance(self, percentage: u8) -> Self {
        let reached = if percentage >= 100 {
            ApplicationStatus::Completed
        } else {
            ApplicationStatus::InProgress
        };
        self.max(reached)
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(ApplicationStatus::Applied),
            "in_progress" => Ok(ApplicationStatus::InProgress),
            "completed" => Ok(ApplicationStatus::Completed),
            other => Err(format!("unknown application status '{other}'")),
        }
    }
}

// --- Accounts ---

/// Student
///
/// Outbound view of a student account. The password hash is kept in the
/// credential store and has no field here, so it cannot leak through a response.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub roll_no: String,
    pub course: String,
    pub section: String,
    pub email: String,
    pub mentor_id: Option<Uuid>,
    pub applied_projects: Vec<Uuid>,
    /// Application status keyed by project id.
    #[schema(value_type = Object)]
    pub project_status: BTreeMap<Uuid, ApplicationStatus>,
    #[schema(value_type = Object)]
    #[ts(type = "Record<string, unknown>")]
    pub profile: Map<String, Value>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Mentor
///
/// Outbound view of a mentor account. `assigned_projects` is derived from the
/// projects whose mentor reference points here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Mentor {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub assigned_projects: Vec<Uuid>,
    #[schema(value_type = Object)]
    #[ts(type = "Record<string, unknown>")]
    pub profile: Map<String, Value>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// AdminProfile
///
/// The static admin identity. It is configuration, not a stored record.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AdminProfile {
    pub id: Uuid,
    pub email: String,
}

/// Profile
///
/// Response of `GET /profile`, tagged by the caller's role.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(tag = "role", rename_all = "lowercase")]
#[ts(export)]
pub enum Profile {
    Admin(AdminProfile),
    Mentor(Mentor),
    Student(Student),
}

// --- Projects ---

/// ProgressUpdate
///
/// One append-only progress entry. `recorded_at` is assigned by the server at
/// append time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ProgressUpdate {
    #[ts(type = "string")]
    pub recorded_at: DateTime<Utc>,
    pub percentage: u8,
    pub milestone: String,
    pub comment: String,
}

/// Submission
///
/// The work a single student has produced on a project, as recorded by the
/// project's mentor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Submission {
    pub student_id: Uuid,
    pub files: Vec<String>,
    pub progress: Vec<ProgressUpdate>,
}

/// Project
///
/// The workflow entity. `status` only moves through `crate::workflow`,
/// `students_applied` holds each student at most once and `submissions` is
/// append-only.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub technologies: Vec<String>,
    pub mentor_id: Option<Uuid>,
    pub students_applied: Vec<Uuid>,
    pub status: ProjectStatus,
    pub submissions: Vec<Submission>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// push_progress
///
/// Appends `update` to the student's submission, creating the submission on
/// first use. Existing entries are never reordered or deduplicated.
pub fn push_progress(
    submissions: &mut Vec<Submission>,
    student_id: Uuid,
    files: Vec<String>,
    update: ProgressUpdate,
) {
    match submissions.iter_mut().find(|s| s.student_id == student_id) {
        Some(submission) => {
            submission.files.extend(files);
            submission.progress.push(update);
        }
        None => submissions.push(Submission {
            student_id,
            files,
            progress: vec![update],
        }),
    }
}

impl Project {
    pub fn has_applicant(&self, student_id: Uuid) -> bool {
        self.students_applied.contains(&student_id)
    }

    pub fn submission_for(&self, student_id: Uuid) -> Option<&Submission> {
        self.submissions.iter().find(|s| s.student_id == student_id)
    }
}

/// ApplicationView
///
/// A project the student applied to, paired with the student's status for it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ApplicationView {
    pub project: Project,
    pub status: ApplicationStatus,
}

// --- Request Payloads (Input Schemas) ---

/// LoginRequest
///
/// Body of `POST /login/{role}`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    #[schema(example = "ada@example.edu")]
    pub email: String,
    pub password: String,
}

/// LoginResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    pub role: Role,
    /// Token lifetime in seconds.
    pub expires_in: u64,
}

/// CreateProjectRequest
///
/// Input payload for proposing a project. New projects always start `pending`
/// with no mentor.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateProjectRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AssignMentorRequest {
    pub mentor_id: Uuid,
}

/// ProgressRequest
///
/// Body of `PUT /projects/{id}/progress`. `files` are appended to the
/// student's submission alongside the progress entry.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ProgressRequest {
    pub student_id: Uuid,
    #[schema(example = 40)]
    pub percentage: u8,
    pub milestone: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AddStudentRequest {
    pub name: String,
    pub roll_no: String,
    pub course: String,
    pub section: String,
    pub email: String,
}

/// UpdateStudentRequest
///
/// Partial update issued by the admin; `None` fields are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateStudentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AddMentorRequest {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateMentorRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// UpdateProfileRequest
///
/// Self-service partial update. A supplied password is re-hashed before it
/// reaches the credential store; a supplied `profile` replaces the stored map.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateProfileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    #[ts(type = "Record<string, unknown> | null")]
    pub profile: Option<Map<String, Value>>,
}
