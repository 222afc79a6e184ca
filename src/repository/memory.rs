use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ApplyOutcome, AssignOutcome, Credentials, MentorChanges, NewMentor, NewProject, NewStudent,
    ProgressOutcome, ProjectFilter, RepoError, RepoResult, Repository, StudentChanges,
};
use crate::models::{
    ApplicationStatus, Mentor, ProgressUpdate, Project, ProjectStatus, Role, Student, Submission,
    push_progress,
};

struct StudentRecord {
    name: String,
    roll_no: String,
    course: String,
    section: String,
    email: String,
    password_hash: String,
    mentor_id: Option<Uuid>,
    profile: Map<String, Value>,
    created_at: DateTime<Utc>,
}

struct MentorRecord {
    name: String,
    email: String,
    password_hash: String,
    profile: Map<String, Value>,
    created_at: DateTime<Utc>,
}

struct ProjectRecord {
    title: String,
    description: String,
    technologies: Vec<String>,
    mentor_id: Option<Uuid>,
    status: ProjectStatus,
    submissions: Vec<Submission>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    // Monotonic insertion counter; breaks created_at ties.
    seq: u64,
}

struct Application {
    project_id: Uuid,
    student_id: Uuid,
    status: ApplicationStatus,
}

/// The whole data set. Relations are stored once (`ProjectRecord::mentor_id`,
/// `applications`) and both sides are derived on read.
#[derive(Default)]
struct Store {
    students: HashMap<Uuid, StudentRecord>,
    mentors: HashMap<Uuid, MentorRecord>,
    projects: HashMap<Uuid, ProjectRecord>,
    // Insertion order is application order.
    applications: Vec<Application>,
    next_seq: u64,
}

impl Store {
    fn student_view(&self, id: Uuid, rec: &StudentRecord) -> Student {
        let mut applied_projects = Vec::new();
        let mut project_status = BTreeMap::new();
        for app in self.applications.iter().filter(|a| a.student_id == id) {
            applied_projects.push(app.project_id);
            project_status.insert(app.project_id, app.status);
        }
        Student {
            id,
            name: rec.name.clone(),
            roll_no: rec.roll_no.clone(),
            course: rec.course.clone(),
            section: rec.section.clone(),
            email: rec.email.clone(),
            mentor_id: rec.mentor_id,
            applied_projects,
            project_status,
            profile: rec.profile.clone(),
            created_at: rec.created_at,
        }
    }

    fn mentor_view(&self, id: Uuid, rec: &MentorRecord) -> Mentor {
        let mut assigned: Vec<(&DateTime<Utc>, u64, Uuid)> = self
            .projects
            .iter()
            .filter(|(_, p)| p.mentor_id == Some(id))
            .map(|(pid, p)| (&p.created_at, p.seq, *pid))
            .collect();
        assigned.sort();
        Mentor {
            id,
            name: rec.name.clone(),
            email: rec.email.clone(),
            assigned_projects: assigned.into_iter().map(|(_, _, pid)| pid).collect(),
            profile: rec.profile.clone(),
            created_at: rec.created_at,
        }
    }

    fn project_view(&self, id: Uuid, rec: &ProjectRecord) -> Project {
        Project {
            id,
            title: rec.title.clone(),
            description: rec.description.clone(),
            technologies: rec.technologies.clone(),
            mentor_id: rec.mentor_id,
            students_applied: self
                .applications
                .iter()
                .filter(|a| a.project_id == id)
                .map(|a| a.student_id)
                .collect(),
            status: rec.status,
            submissions: rec.submissions.clone(),
            created_at: rec.created_at,
            updated_at: rec.updated_at,
        }
    }

    fn check_student_unique(
        &self,
        except: Option<Uuid>,
        email: Option<&str>,
        roll_no: Option<&str>,
    ) -> RepoResult<()> {
        for (id, s) in &self.students {
            if Some(*id) == except {
                continue;
            }
            if email.is_some_and(|e| s.email.eq_ignore_ascii_case(e)) {
                return Err(RepoError::Conflict("a student with this email already exists".into()));
            }
            if roll_no.is_some_and(|r| s.roll_no == r) {
                return Err(RepoError::Conflict(
                    "a student with this roll number already exists".into(),
                ));
            }
        }
        Ok(())
    }

    fn check_mentor_unique(&self, except: Option<Uuid>, email: &str) -> RepoResult<()> {
        let taken = self
            .mentors
            .iter()
            .any(|(id, m)| Some(*id) != except && m.email.eq_ignore_ascii_case(email));
        if taken {
            return Err(RepoError::Conflict("a mentor with this email already exists".into()));
        }
        Ok(())
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// InMemoryRepository
///
/// `Repository` backed by process memory. Used for local runs without a
/// database and throughout the test suite. Each trait call takes the lock
/// once, so every workflow write is atomic.
#[derive(Default)]
pub struct InMemoryRepository {
    store: RwLock<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_credentials(&self, role: Role, email: &str) -> RepoResult<Option<Credentials>> {
        let store = self.store.read().await;
        let found = match role {
            Role::Admin => None,
            Role::Student => store
                .students
                .iter()
                .find(|(_, s)| s.email.eq_ignore_ascii_case(email))
                .map(|(id, s)| Credentials {
                    id: *id,
                    password_hash: s.password_hash.clone(),
                }),
            Role::Mentor => store
                .mentors
                .iter()
                .find(|(_, m)| m.email.eq_ignore_ascii_case(email))
                .map(|(id, m)| Credentials {
                    id: *id,
                    password_hash: m.password_hash.clone(),
                }),
        };
        Ok(found)
    }

    // --- Students ---

    async fn create_student(&self, new: NewStudent) -> RepoResult<Student> {
        let mut store = self.store.write().await;
        store.check_student_unique(None, Some(&new.email), Some(&new.roll_no))?;

        let id = Uuid::new_v4();
        let record = StudentRecord {
            name: new.name,
            roll_no: new.roll_no,
            course: new.course,
            section: new.section,
            email: new.email,
            password_hash: new.password_hash,
            mentor_id: None,
            profile: Map::new(),
            created_at: Utc::now(),
        };
        let view = store.student_view(id, &record);
        store.students.insert(id, record);
        Ok(view)
    }

    async fn get_student(&self, id: Uuid) -> RepoResult<Option<Student>> {
        let store = self.store.read().await;
        Ok(store.students.get(&id).map(|rec| store.student_view(id, rec)))
    }

    async fn list_students(&self) -> RepoResult<Vec<Student>> {
        let store = self.store.read().await;
        let mut students: Vec<Student> = store
            .students
            .iter()
            .map(|(id, rec)| store.student_view(*id, rec))
            .collect();
        students.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.roll_no.cmp(&b.roll_no)));
        Ok(students)
    }

    async fn update_student(&self, id: Uuid, changes: StudentChanges) -> RepoResult<Option<Student>> {
        let mut store = self.store.write().await;
        if !store.students.contains_key(&id) {
            return Ok(None);
        }
        store.check_student_unique(Some(id), changes.email.as_deref(), changes.roll_no.as_deref())?;
        if let Some(mentor_id) = changes.mentor_id {
            if !store.mentors.contains_key(&mentor_id) {
                return Err(RepoError::MissingReference(format!("mentor {mentor_id}")));
            }
        }

        let Some(rec) = store.students.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = changes.name {
            rec.name = v;
        }
        if let Some(v) = changes.roll_no {
            rec.roll_no = v;
        }
        if let Some(v) = changes.course {
            rec.course = v;
        }
        if let Some(v) = changes.section {
            rec.section = v;
        }
        if let Some(v) = changes.email {
            rec.email = v;
        }
        if let Some(v) = changes.mentor_id {
            rec.mentor_id = Some(v);
        }
        if let Some(v) = changes.password_hash {
            rec.password_hash = v;
        }
        if let Some(v) = changes.profile {
            rec.profile = v;
        }

        Ok(store.students.get(&id).map(|rec| store.student_view(id, rec)))
    }

    async fn delete_student(&self, id: Uuid) -> RepoResult<bool> {
        let mut store = self.store.write().await;
        if store.students.remove(&id).is_none() {
            return Ok(false);
        }
        store.applications.retain(|a| a.student_id != id);
        Ok(true)
    }

    // --- Mentors ---

    async fn create_mentor(&self, new: NewMentor) -> RepoResult<Mentor> {
        let mut store = self.store.write().await;
        store.check_mentor_unique(None, &new.email)?;

        let id = Uuid::new_v4();
        let record = MentorRecord {
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
            profile: Map::new(),
            created_at: Utc::now(),
        };
        let view = store.mentor_view(id, &record);
        store.mentors.insert(id, record);
        Ok(view)
    }

    async fn get_mentor(&self, id: Uuid) -> RepoResult<Option<Mentor>> {
        let store = self.store.read().await;
        Ok(store.mentors.get(&id).map(|rec| store.mentor_view(id, rec)))
    }

    async fn list_mentors(&self) -> RepoResult<Vec<Mentor>> {
        let store = self.store.read().await;
        let mut mentors: Vec<Mentor> = store
            .mentors
            .iter()
            .map(|(id, rec)| store.mentor_view(*id, rec))
            .collect();
        mentors.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
        Ok(mentors)
    }

    async fn update_mentor(&self, id: Uuid, changes: MentorChanges) -> RepoResult<Option<Mentor>> {
        let mut store = self.store.write().await;
        if !store.mentors.contains_key(&id) {
            return Ok(None);
        }
        if let Some(email) = &changes.email {
            store.check_mentor_unique(Some(id), email)?;
        }

        let Some(rec) = store.mentors.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = changes.name {
            rec.name = v;
        }
        if let Some(v) = changes.email {
            rec.email = v;
        }
        if let Some(v) = changes.password_hash {
            rec.password_hash = v;
        }
        if let Some(v) = changes.profile {
            rec.profile = v;
        }

        Ok(store.mentors.get(&id).map(|rec| store.mentor_view(id, rec)))
    }

    async fn delete_mentor(&self, id: Uuid) -> RepoResult<bool> {
        let mut store = self.store.write().await;
        if store.mentors.remove(&id).is_none() {
            return Ok(false);
        }
        for project in store.projects.values_mut() {
            if project.mentor_id == Some(id) {
                project.mentor_id = None;
            }
        }
        for student in store.students.values_mut() {
            if student.mentor_id == Some(id) {
                student.mentor_id = None;
            }
        }
        Ok(true)
    }

    // --- Projects ---

    async fn create_project(&self, new: NewProject) -> RepoResult<Project> {
        let mut store = self.store.write().await;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let seq = store.bump_seq();
        let record = ProjectRecord {
            title: new.title,
            description: new.description,
            technologies: new.technologies,
            mentor_id: None,
            status: ProjectStatus::Pending,
            submissions: Vec::new(),
            created_at: now,
            updated_at: now,
            seq,
        };
        let view = store.project_view(id, &record);
        store.projects.insert(id, record);
        Ok(view)
    }

    async fn get_project(&self, id: Uuid) -> RepoResult<Option<Project>> {
        let store = self.store.read().await;
        Ok(store.projects.get(&id).map(|rec| store.project_view(id, rec)))
    }

    async fn list_projects(&self, filter: ProjectFilter) -> RepoResult<Vec<Project>> {
        let store = self.store.read().await;
        let mut matching: Vec<(&Uuid, &ProjectRecord)> = store
            .projects
            .iter()
            .filter(|(_, p)| filter.status.is_none_or(|s| p.status == s))
            .filter(|(_, p)| filter.mentor_id.is_none_or(|m| p.mentor_id == Some(m)))
            .filter(|(id, _)| {
                filter.applicant_id.is_none_or(|sid| {
                    store
                        .applications
                        .iter()
                        .any(|a| a.project_id == **id && a.student_id == sid)
                })
            })
            .collect();
        matching.sort_by(|(_, a), (_, b)| {
            b.created_at.cmp(&a.created_at).then(b.seq.cmp(&a.seq))
        });
        Ok(matching
            .into_iter()
            .map(|(id, rec)| store.project_view(*id, rec))
            .collect())
    }

    // --- Workflow writes ---

    async fn transition_status(
        &self,
        id: Uuid,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> RepoResult<Option<Project>> {
        let mut store = self.store.write().await;
        let Some(rec) = store.projects.get_mut(&id) else {
            return Ok(None);
        };
        if rec.status != from {
            return Ok(None);
        }
        rec.status = to;
        rec.updated_at = Utc::now();
        Ok(store.projects.get(&id).map(|rec| store.project_view(id, rec)))
    }

    async fn set_project_mentor(&self, project_id: Uuid, mentor_id: Uuid) -> RepoResult<AssignOutcome> {
        let mut store = self.store.write().await;
        if !store.projects.contains_key(&project_id) {
            return Ok(AssignOutcome::ProjectMissing);
        }
        if !store.mentors.contains_key(&mentor_id) {
            return Ok(AssignOutcome::MentorMissing);
        }
        let Some(rec) = store.projects.get_mut(&project_id) else {
            return Ok(AssignOutcome::ProjectMissing);
        };
        let previous = rec.mentor_id.replace(mentor_id);
        rec.updated_at = Utc::now();
        Ok(AssignOutcome::Assigned { previous })
    }

    async fn add_applicant(
        &self,
        project_id: Uuid,
        student_id: Uuid,
        required_status: ProjectStatus,
    ) -> RepoResult<ApplyOutcome> {
        let mut store = self.store.write().await;
        let Some(project) = store.projects.get(&project_id) else {
            return Ok(ApplyOutcome::ProjectMissing);
        };
        if project.status != required_status {
            return Ok(ApplyOutcome::StatusMismatch(project.status));
        }
        if !store.students.contains_key(&student_id) {
            return Ok(ApplyOutcome::StudentMissing);
        }
        let duplicate = store
            .applications
            .iter()
            .any(|a| a.project_id == project_id && a.student_id == student_id);
        if duplicate {
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        store.applications.push(Application {
            project_id,
            student_id,
            status: ApplicationStatus::Applied,
        });
        Ok(ApplyOutcome::Added)
    }

    async fn append_progress(
        &self,
        project_id: Uuid,
        mentor_id: Uuid,
        student_id: Uuid,
        files: Vec<String>,
        update: ProgressUpdate,
    ) -> RepoResult<ProgressOutcome> {
        let mut store = self.store.write().await;
        let Some(project) = store.projects.get(&project_id) else {
            return Ok(ProgressOutcome::ProjectMissing);
        };
        if project.mentor_id != Some(mentor_id) {
            return Ok(ProgressOutcome::NotAssigned);
        }
        let Some(app_idx) = store
            .applications
            .iter()
            .position(|a| a.project_id == project_id && a.student_id == student_id)
        else {
            return Ok(ProgressOutcome::NotApplied);
        };

        let percentage = update.percentage;
        if let Some(project) = store.projects.get_mut(&project_id) {
            push_progress(&mut project.submissions, student_id, files, update);
            project.updated_at = Utc::now();
        }
        let app = &mut store.applications[app_idx];
        app.status = app.status.advance(percentage);
        Ok(ProgressOutcome::Recorded)
    }
}
