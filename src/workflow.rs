use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Project, ProgressUpdate, ProjectStatus},
    notify::{self, Outbox},
    repository::{ApplyOutcome, AssignOutcome, ProgressOutcome, RepositoryState},
};

/// Transition
///
/// The admin decisions on a proposed project. Both are only legal from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Approve,
    Reject,
}

impl Transition {
    pub fn verb(&self) -> &'static str {
        match self {
            Transition::Approve => "approve",
            Transition::Reject => "reject",
        }
    }

    fn past_tense(&self) -> &'static str {
        match self {
            Transition::Approve => "approved",
            Transition::Reject => "rejected",
        }
    }

    /// next_status
    ///
    /// The status this transition leads to from `current`, or
    /// `InvalidTransition` when `current` is not `Pending`.
    pub fn next_status(&self, current: ProjectStatus) -> Result<ProjectStatus, AppError> {
        match (current, self) {
            (ProjectStatus::Pending, Transition::Approve) => Ok(ProjectStatus::Approved),
            (ProjectStatus::Pending, Transition::Reject) => Ok(ProjectStatus::Rejected),
            (from, _) => Err(AppError::InvalidTransition {
                from,
                action: self.verb(),
            }),
        }
    }
}

/// ProgressEntry
///
/// What a mentor submits for one student; the timestamp is added on append.
#[derive(Debug, Clone)]
pub struct ProgressEntry {
    pub percentage: u8,
    pub milestone: String,
    pub comment: String,
    pub files: Vec<String>,
}

/// Workflow
///
/// Project lifecycle operations. Each state change is one repository call
/// (atomic per backend) and notifications are only queued once it has committed.
#[derive(Clone)]
pub struct Workflow {
    repo: RepositoryState,
    outbox: Outbox,
}

impl Workflow {
    pub fn new(repo: RepositoryState, outbox: Outbox) -> Self {
        Self { repo, outbox }
    }

    pub async fn approve(&self, project_id: Uuid) -> Result<Project, AppError> {
        self.decide(project_id, Transition::Approve).await
    }

    pub async fn reject(&self, project_id: Uuid) -> Result<Project, AppError> {
        self.decide(project_id, Transition::Reject).await
    }

    async fn decide(&self, project_id: Uuid, transition: Transition) -> Result<Project, AppError> {
        let current = self
            .repo
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::not_found("project"))?;
        let next = transition.next_status(current.status)?;

        // Compare-and-set: a concurrent decision makes this return None.
        let Some(project) = self
            .repo
            .transition_status(project_id, current.status, next)
            .await?
        else {
            return match self.repo.get_project(project_id).await? {
                Some(moved) => Err(AppError::InvalidTransition {
                    from: moved.status,
                    action: transition.verb(),
                }),
                None => Err(AppError::not_found("project")),
            };
        };

        tracing::info!(%project_id, status = %project.status, "project {}", transition.past_tense());

        for student_id in &project.students_applied {
            match self.repo.get_student(*student_id).await {
                Ok(Some(student)) => {
                    let email = notify::project_decision_email(
                        &student.email,
                        &project.title,
                        transition.past_tense(),
                    );
                    self.outbox.send(email);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(%student_id, error = %e, "could not look up applicant to notify"),
            }
        }

        Ok(project)
    }

    /// assign_mentor
    ///
    /// Allowed in any project status. Re-assigning the current mentor changes
    /// nothing and sends nothing.
    pub async fn assign_mentor(&self, project_id: Uuid, mentor_id: Uuid) -> Result<Project, AppError> {
        let previous = match self.repo.set_project_mentor(project_id, mentor_id).await? {
            AssignOutcome::Assigned { previous } => previous,
            AssignOutcome::ProjectMissing => return Err(AppError::not_found("project")),
            AssignOutcome::MentorMissing => return Err(AppError::not_found("mentor")),
        };

        let project = self
            .repo
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::not_found("project"))?;

        if previous == Some(mentor_id) {
            return Ok(project);
        }
        tracing::info!(%project_id, %mentor_id, ?previous, "mentor assigned");

        if let Some(mentor) = self.repo.get_mentor(mentor_id).await? {
            let email = notify::mentor_assigned_email(&mentor.email, &project.title);
            self.outbox.send(email);
        }
        if let Some(previous_id) = previous {
            if let Some(old) = self.repo.get_mentor(previous_id).await? {
                let email = notify::mentor_unassigned_email(&old.email, &project.title);
                self.outbox.send(email);
            }
        }

        Ok(project)
    }

    /// apply
    ///
    /// Students may only apply to `Approved` projects, once each.
    pub async fn apply(&self, project_id: Uuid, student_id: Uuid) -> Result<Project, AppError> {
        match self
            .repo
            .add_applicant(project_id, student_id, ProjectStatus::Approved)
            .await?
        {
            ApplyOutcome::Added => {}
            ApplyOutcome::AlreadyApplied => {
                return Err(AppError::Conflict("already applied to this project".to_string()));
            }
            ApplyOutcome::StatusMismatch(from) => {
                return Err(AppError::InvalidTransition {
                    from,
                    action: "apply to",
                });
            }
            ApplyOutcome::ProjectMissing => return Err(AppError::not_found("project")),
            ApplyOutcome::StudentMissing => return Err(AppError::not_found("student")),
        }

        tracing::info!(%project_id, %student_id, "student applied");
        self.repo
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::not_found("project"))
    }

    /// record_progress
    ///
    /// Appends a progress entry to the student's submission. The project status
    /// is untouched; the student's application status only moves forward.
    pub async fn record_progress(
        &self,
        project_id: Uuid,
        mentor_id: Uuid,
        student_id: Uuid,
        entry: ProgressEntry,
    ) -> Result<Project, AppError> {
        let update = ProgressUpdate {
            recorded_at: Utc::now(),
            percentage: entry.percentage,
            milestone: entry.milestone,
            comment: entry.comment,
        };

        match self
            .repo
            .append_progress(project_id, mentor_id, student_id, entry.files, update)
            .await?
        {
            ProgressOutcome::Recorded => {}
            ProgressOutcome::ProjectMissing => return Err(AppError::not_found("project")),
            ProgressOutcome::NotAssigned => {
                return Err(AppError::Forbidden(
                    "only the assigned mentor may record progress".to_string(),
                ));
            }
            ProgressOutcome::NotApplied => {
                return Err(AppError::not_found("applicant on this project"));
            }
        }

        tracing::info!(%project_id, %student_id, percentage = entry.percentage, "progress recorded");
        self.repo
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::not_found("project"))
    }
}
