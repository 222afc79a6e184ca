use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{FromRow, PgPool, Postgres, query_builder::QueryBuilder, types::Json};
use uuid::Uuid;

use super::{
    ApplyOutcome, AssignOutcome, Credentials, MentorChanges, NewMentor, NewProject, NewStudent,
    ProgressOutcome, ProjectFilter, RepoError, RepoResult, Repository, StudentChanges,
};
use crate::models::{
    ApplicationStatus, Mentor, ProgressUpdate, Project, ProjectStatus, Role, Student, Submission,
    push_progress,
};

// --- Row Types (database shape, converted into the outbound models) ---

#[derive(FromRow)]
struct ProjectRow {
    id: Uuid,
    title: String,
    description: String,
    technologies: Vec<String>,
    mentor_id: Option<Uuid>,
    status: String,
    submissions: Json<Vec<Submission>>,
    students_applied: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = RepoError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            id: row.id,
            title: row.title,
            description: row.description,
            technologies: row.technologies,
            mentor_id: row.mentor_id,
            students_applied: row.students_applied,
            status: row.status.parse().map_err(RepoError::Corrupt)?,
            submissions: row.submissions.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct StudentRow {
    id: Uuid,
    name: String,
    roll_no: String,
    course: String,
    section: String,
    email: String,
    mentor_id: Option<Uuid>,
    profile: Json<Map<String, Value>>,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ApplicationRow {
    student_id: Uuid,
    project_id: Uuid,
    status: String,
}

#[derive(FromRow)]
struct MentorRow {
    id: Uuid,
    name: String,
    email: String,
    profile: Json<Map<String, Value>>,
    assigned_projects: Vec<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<MentorRow> for Mentor {
    fn from(row: MentorRow) -> Self {
        Mentor {
            id: row.id,
            name: row.name,
            email: row.email,
            assigned_projects: row.assigned_projects,
            profile: row.profile.0,
            created_at: row.created_at,
        }
    }
}

// `students_applied` is derived from `project_applications` in application order.
const PROJECT_SELECT: &str = r#"
    SELECT
        p.id, p.title, p.description, p.technologies, p.mentor_id, p.status,
        p.submissions, p.created_at, p.updated_at,
        COALESCE(
            (SELECT array_agg(a.student_id ORDER BY a.applied_at, a.student_id)
             FROM project_applications a WHERE a.project_id = p.id),
            '{}'
        ) AS students_applied
    FROM projects p
"#;

const STUDENT_SELECT: &str = r#"
    SELECT id, name, roll_no, course, section, email, mentor_id, profile, created_at
    FROM students
"#;

// `assigned_projects` is derived from `projects.mentor_id`, oldest first.
const MENTOR_SELECT: &str = r#"
    SELECT
        m.id, m.name, m.email, m.profile, m.created_at,
        COALESCE(
            (SELECT array_agg(p.id ORDER BY p.created_at, p.id)
             FROM projects p WHERE p.mentor_id = m.id),
            '{}'
        ) AS assigned_projects
    FROM mentors m
"#;

/// Maps constraint violations onto the repository taxonomy.
fn classify(err: sqlx::Error, conflict_msg: &str) -> RepoError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return RepoError::Conflict(conflict_msg.to_string());
        }
        if db.is_foreign_key_violation() {
            return RepoError::MissingReference(
                db.constraint().unwrap_or("foreign key").to_string(),
            );
        }
    }
    tracing::error!("postgres error: {:?}", err);
    RepoError::Database(err)
}

/// PostgresRepository
///
/// `Repository` backed by PostgreSQL. Every workflow write runs inside one
/// transaction and locks the project row (`FOR UPDATE`) before checking its
/// preconditions.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded schema migrations under `migrations/`.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// Attaches `applied_projects` and `project_status` to student rows with a
    /// single query over their applications.
    async fn hydrate_students(&self, rows: Vec<StudentRow>) -> RepoResult<Vec<Student>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let apps = sqlx::query_as::<_, ApplicationRow>(
            r#"SELECT student_id, project_id, status
               FROM project_applications
               WHERE student_id = ANY($1)
               ORDER BY applied_at, project_id"#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(e, "application"))?;

        let mut by_student: HashMap<Uuid, Vec<ApplicationRow>> = HashMap::new();
        for app in apps {
            by_student.entry(app.student_id).or_default().push(app);
        }

        rows.into_iter()
            .map(|row| -> RepoResult<Student> {
                let mut applied_projects = Vec::new();
                let mut project_status = BTreeMap::new();
                for app in by_student.remove(&row.id).unwrap_or_default() {
                    let status: ApplicationStatus =
                        app.status.parse().map_err(RepoError::Corrupt)?;
                    applied_projects.push(app.project_id);
                    project_status.insert(app.project_id, status);
                }
                Ok(Student {
                    id: row.id,
                    name: row.name,
                    roll_no: row.roll_no,
                    course: row.course,
                    section: row.section,
                    email: row.email,
                    mentor_id: row.mentor_id,
                    applied_projects,
                    project_status,
                    profile: row.profile.0,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// find_credentials
    ///
    /// Email comparison is case-insensitive; emails are stored lowercased.
    async fn find_credentials(&self, role: Role, email: &str) -> RepoResult<Option<Credentials>> {
        let sql = match role {
            Role::Admin => return Ok(None),
            Role::Student => "SELECT id, password_hash FROM students WHERE lower(email) = lower($1)",
            Role::Mentor => "SELECT id, password_hash FROM mentors WHERE lower(email) = lower($1)",
        };
        let row: Option<(Uuid, String)> = sqlx::query_as(sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "credentials"))?;
        Ok(row.map(|(id, password_hash)| Credentials { id, password_hash }))
    }

    // --- Students ---

    async fn create_student(&self, new: NewStudent) -> RepoResult<Student> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO students (id, name, roll_no, course, section, email, password_hash)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(id)
        .bind(&new.name)
        .bind(&new.roll_no)
        .bind(&new.course)
        .bind(&new.section)
        .bind(&new.email)
        .bind(&new.password_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "a student with this email or roll number already exists"))?;

        self.get_student(id)
            .await?
            .ok_or_else(|| RepoError::Corrupt(format!("student {id} vanished after insert")))
    }

    async fn get_student(&self, id: Uuid) -> RepoResult<Option<Student>> {
        let row = sqlx::query_as::<_, StudentRow>(&format!("{STUDENT_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "student"))?;
        match row {
            Some(row) => Ok(self.hydrate_students(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_students(&self) -> RepoResult<Vec<Student>> {
        let rows = sqlx::query_as::<_, StudentRow>(&format!(
            "{STUDENT_SELECT} ORDER BY created_at, roll_no"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(e, "student"))?;
        self.hydrate_students(rows).await
    }

    /// update_student
    ///
    /// Uses `COALESCE` so only the `Some` fields of `changes` are written.
    async fn update_student(&self, id: Uuid, changes: StudentChanges) -> RepoResult<Option<Student>> {
        let updated: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE students
            SET name = COALESCE($2, name),
                roll_no = COALESCE($3, roll_no),
                course = COALESCE($4, course),
                section = COALESCE($5, section),
                email = COALESCE($6, email),
                mentor_id = COALESCE($7, mentor_id),
                password_hash = COALESCE($8, password_hash),
                profile = COALESCE($9, profile)
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(changes.name)
        .bind(changes.roll_no)
        .bind(changes.course)
        .bind(changes.section)
        .bind(changes.email)
        .bind(changes.mentor_id)
        .bind(changes.password_hash)
        .bind(changes.profile.map(Json))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, "a student with this email or roll number already exists"))?;

        match updated {
            Some(_) => self.get_student(id).await,
            None => Ok(None),
        }
    }

    /// delete_student
    ///
    /// `project_applications` rows go with the student (`ON DELETE CASCADE`).
    async fn delete_student(&self, id: Uuid) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM students WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "student"))?;
        Ok(res.rows_affected() > 0)
    }

    // --- Mentors ---

    async fn create_mentor(&self, new: NewMentor) -> RepoResult<Mentor> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO mentors (id, name, email, password_hash) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(&new.name)
            .bind(&new.email)
            .bind(&new.password_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "a mentor with this email already exists"))?;

        self.get_mentor(id)
            .await?
            .ok_or_else(|| RepoError::Corrupt(format!("mentor {id} vanished after insert")))
    }

    async fn get_mentor(&self, id: Uuid) -> RepoResult<Option<Mentor>> {
        let row = sqlx::query_as::<_, MentorRow>(&format!("{MENTOR_SELECT} WHERE m.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "mentor"))?;
        Ok(row.map(Mentor::from))
    }

    async fn list_mentors(&self) -> RepoResult<Vec<Mentor>> {
        let rows = sqlx::query_as::<_, MentorRow>(&format!(
            "{MENTOR_SELECT} ORDER BY m.created_at, m.email"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(e, "mentor"))?;
        Ok(rows.into_iter().map(Mentor::from).collect())
    }

    async fn update_mentor(&self, id: Uuid, changes: MentorChanges) -> RepoResult<Option<Mentor>> {
        let updated: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE mentors
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                password_hash = COALESCE($4, password_hash),
                profile = COALESCE($5, profile)
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(changes.name)
        .bind(changes.email)
        .bind(changes.password_hash)
        .bind(changes.profile.map(Json))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, "a mentor with this email already exists"))?;

        match updated {
            Some(_) => self.get_mentor(id).await,
            None => Ok(None),
        }
    }

    /// delete_mentor
    ///
    /// Project and student mentor references are cleared by `ON DELETE SET NULL`.
    async fn delete_mentor(&self, id: Uuid) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM mentors WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "mentor"))?;
        Ok(res.rows_affected() > 0)
    }

    // --- Projects ---

    async fn create_project(&self, new: NewProject) -> RepoResult<Project> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO projects (id, title, description, technologies, status)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.technologies)
        .bind(ProjectStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "project"))?;

        self.get_project(id)
            .await?
            .ok_or_else(|| RepoError::Corrupt(format!("project {id} vanished after insert")))
    }

    async fn get_project(&self, id: Uuid) -> RepoResult<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!("{PROJECT_SELECT} WHERE p.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "project"))?;
        row.map(Project::try_from).transpose()
    }

    /// list_projects
    ///
    /// Builds the filter with `QueryBuilder` so every value is a bound parameter.
    async fn list_projects(&self, filter: ProjectFilter) -> RepoResult<Vec<Project>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(PROJECT_SELECT);
        builder.push(" WHERE TRUE");

        if let Some(status) = filter.status {
            builder.push(" AND p.status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(mentor_id) = filter.mentor_id {
            builder.push(" AND p.mentor_id = ");
            builder.push_bind(mentor_id);
        }
        if let Some(student_id) = filter.applicant_id {
            builder.push(
                " AND EXISTS (SELECT 1 FROM project_applications a WHERE a.project_id = p.id AND a.student_id = ",
            );
            builder.push_bind(student_id);
            builder.push(")");
        }
        builder.push(" ORDER BY p.created_at DESC, p.id");

        let rows = builder
            .build_query_as::<ProjectRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(e, "project"))?;
        rows.into_iter().map(Project::try_from).collect()
    }

    // --- Workflow writes ---

    async fn transition_status(
        &self,
        id: Uuid,
        from: ProjectStatus,
        to: ProjectStatus,
    ) -> RepoResult<Option<Project>> {
        let updated: Option<(Uuid,)> = sqlx::query_as(
            r#"UPDATE projects SET status = $3, updated_at = NOW()
               WHERE id = $1 AND status = $2
               RETURNING id"#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, "project"))?;

        match updated {
            Some(_) => self.get_project(id).await,
            None => Ok(None),
        }
    }

    async fn set_project_mentor(&self, project_id: Uuid, mentor_id: Uuid) -> RepoResult<AssignOutcome> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(Option<Uuid>,)> =
            sqlx::query_as("SELECT mentor_id FROM projects WHERE id = $1 FOR UPDATE")
                .bind(project_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((previous,)) = current else {
            return Ok(AssignOutcome::ProjectMissing);
        };

        let mentor: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM mentors WHERE id = $1 FOR SHARE")
            .bind(mentor_id)
            .fetch_optional(&mut *tx)
            .await?;
        if mentor.is_none() {
            return Ok(AssignOutcome::MentorMissing);
        }

        sqlx::query("UPDATE projects SET mentor_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(project_id)
            .bind(mentor_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(AssignOutcome::Assigned { previous })
    }

    /// add_applicant
    ///
    /// One `project_applications` row is both sides of the relation
    /// (`Project.students_applied` and `Student.applied_projects`).
    async fn add_applicant(
        &self,
        project_id: Uuid,
        student_id: Uuid,
        required_status: ProjectStatus,
    ) -> RepoResult<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM projects WHERE id = $1 FOR UPDATE")
                .bind(project_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((status,)) = status else {
            return Ok(ApplyOutcome::ProjectMissing);
        };
        let status: ProjectStatus = status.parse().map_err(RepoError::Corrupt)?;
        if status != required_status {
            return Ok(ApplyOutcome::StatusMismatch(status));
        }

        let student: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM students WHERE id = $1 FOR SHARE")
            .bind(student_id)
            .fetch_optional(&mut *tx)
            .await?;
        if student.is_none() {
            return Ok(ApplyOutcome::StudentMissing);
        }

        let inserted = sqlx::query(
            r#"INSERT INTO project_applications (project_id, student_id, status)
               VALUES ($1, $2, $3)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(project_id)
        .bind(student_id)
        .bind(ApplicationStatus::Applied.as_str())
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;

        let project: Option<(Option<Uuid>, Json<Vec<Submission>>)> =
            sqlx::query_as("SELECT mentor_id, submissions FROM projects WHERE id = $1 FOR UPDATE")
                .bind(project_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((assigned, Json(mut submissions))) = project else {
            return Ok(ProgressOutcome::ProjectMissing);
        };
        if assigned != Some(mentor_id) {
            return Ok(ProgressOutcome::NotAssigned);
        }

        let application: Option<(String,)> = sqlx::query_as(
            r#"SELECT status FROM project_applications
               WHERE project_id = $1 AND student_id = $2
               FOR UPDATE"#,
        )
        .bind(project_id)
        .bind(student_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((app_status,)) = application else {
            return Ok(ProgressOutcome::NotApplied);
        };
        let app_status: ApplicationStatus = app_status.parse().map_err(RepoError::Corrupt)?;
        let next_status = app_status.advance(update.percentage);

        push_progress(&mut submissions, student_id, files, update);

        sqlx::query("UPDATE projects SET submissions = $2, updated_at = NOW() WHERE id = $1")
            .bind(project_id)
            .bind(Json(&submissions))
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE project_applications SET status = $3 WHERE project_id = $1 AND student_id = $2",
        )
        .bind(project_id)
        .bind(student_id)
        .bind(next_status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ProgressOutcome::Recorded)
    }
}
