use crate::{
    AppState,
    auth::{ADMIN_SUBJECT_ID, Principal},
    error::{AppError, MessageBody, ValidationErrorBody},
    extract::{AppJson, AppPath, AppQuery},
    models::{
        AddMentorRequest, AddStudentRequest, AdminProfile, ApplicationView, AssignMentorRequest,
        CreateProjectRequest, LoginRequest, LoginResponse, Mentor, Profile, ProgressRequest,
        Project, ProjectStatus, Role, Student, UpdateMentorRequest, UpdateProfileRequest,
        UpdateStudentRequest,
    },
    notify,
    password::{constant_time_eq, generate_password, hash_password, verify_password},
    repository::{MentorChanges, NewMentor, NewProject, NewStudent, ProjectFilter, StudentChanges},
    validation::{Validate, normalize_email},
    workflow::ProgressEntry,
};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

// --- Query Structs ---

/// ProjectQuery
///
/// Query parameters of `GET /projects`. `status` is only honoured for the
/// admin; students and mentors always get their own scope.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct ProjectQuery {
    pub status: Option<ProjectStatus>,
}

/// Whether `principal` may see `project` at all. Hidden projects answer 404.
fn visible_to(project: &Project, principal: &Principal) -> bool {
    match principal.role {
        Role::Admin => true,
        Role::Mentor => project.mentor_id == Some(principal.subject_id),
        Role::Student => {
            project.status == ProjectStatus::Approved || project.has_applicant(principal.subject_id)
        }
    }
}

// --- Authentication ---

/// login
///
/// [Public Route] Exchanges credentials for a signed identity token.
/// `role` is one of `admin`, `student`, `mentor`. The admin is checked against the
/// configured credentials; students and mentors against the credential store.
///
/// *Rate limit*: login endpoints share a tighter per-caller quota.
#[utoipa::path(
    post,
    path = "/login/{role}",
    params(("role" = Role, Path, description = "admin | student | mentor")),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse),
        (status = 400, description = "Malformed credentials", body = ValidationErrorBody),
        (status = 401, description = "Wrong email or password", body = MessageBody),
        (status = 429, description = "Too many attempts", body = MessageBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    AppPath(role): AppPath<Role>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    payload.validate()?;
    let email = normalize_email(&payload.email);

    let subject_id = match role {
        Role::Admin => {
            let admin = &state.config.admin;
            let email_ok = constant_time_eq(&email, &normalize_email(&admin.email));
            let password_ok = constant_time_eq(&payload.password, &admin.password);
            if !(email_ok & password_ok) {
                tracing::warn!(%role, "failed login");
                return Err(AppError::InvalidCredentials);
            }
            ADMIN_SUBJECT_ID
        }
        Role::Student | Role::Mentor => {
            // Unknown emails still pay for one Argon2 verification.
            let credentials = state.repo.find_credentials(role, &email).await?;
            let stored_hash = credentials.as_ref().map(|c| c.password_hash.as_str());
            let verified = verify_password(&payload.password, stored_hash).await;
            match credentials {
                Some(c) if verified => c.id,
                _ => {
                    tracing::warn!(%role, "failed login");
                    return Err(AppError::InvalidCredentials);
                }
            }
        }
    };

    let token = state.tokens.issue(subject_id, role, state.config.token_ttl)?;
    tracing::info!(%role, subject = %subject_id, "login succeeded");

    Ok(Json(LoginResponse {
        token,
        role,
        expires_in: state.config.token_ttl.as_secs(),
    }))
}

// --- Self Service ---

/// get_profile
///
/// [Authenticated Route] Returns the caller's own account, tagged by role.
#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "Current account", body = Profile),
        (status = 401, description = "Missing or invalid token", body = MessageBody),
        (status = 404, description = "Account was deleted", body = MessageBody)
    )
)]
pub async fn get_profile(
    principal: Principal,
    State(state): State<AppState>,
) -> Result<Json<Profile>, AppError> {
    let profile = match principal.role {
        Role::Admin => Profile::Admin(AdminProfile {
            id: ADMIN_SUBJECT_ID,
            email: state.config.admin.email.clone(),
        }),
        Role::Student => Profile::Student(
            state
                .repo
                .get_student(principal.subject_id)
                .await?
                .ok_or_else(|| AppError::not_found("student"))?,
        ),
        Role::Mentor => Profile::Mentor(
            state
                .repo
                .get_mentor(principal.subject_id)
                .await?
                .ok_or_else(|| AppError::not_found("mentor"))?,
        ),
    };
    Ok(Json(profile))
}

/// update_profile
///
/// [Authenticated Route] Partial self-service update. A new password is hashed
/// before it reaches the store. The admin identity is configuration and cannot
/// be edited here.
#[utoipa::path(
    put,
    path = "/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated account", body = Profile),
        (status = 400, description = "Invalid fields", body = ValidationErrorBody),
        (status = 403, description = "Admin profile is read-only", body = MessageBody),
        (status = 409, description = "Email already taken", body = MessageBody)
    )
)]
pub async fn update_profile(
    principal: Principal,
    State(state): State<AppState>,
    AppJson(payload): AppJson<UpdateProfileRequest>,
) -> Result<Json<Profile>, AppError> {
    if principal.role == Role::Admin {
        return Err(AppError::Forbidden("the admin profile is read-only".to_string()));
    }
    payload.validate()?;

    let password_hash = match payload.password.as_deref() {
        Some(password) => Some(hash_password(password).await?),
        None => None,
    };
    let email = payload.email.as_deref().map(normalize_email);
    let name = payload.name.map(|n| n.trim().to_string());

    let profile = match principal.role {
        Role::Student => {
            let changes = StudentChanges {
                name,
                email,
                password_hash,
                profile: payload.profile,
                ..Default::default()
            };
            Profile::Student(
                state
                    .repo
                    .update_student(principal.subject_id, changes)
                    .await?
                    .ok_or_else(|| AppError::not_found("student"))?,
            )
        }
        _ => {
            let changes = MentorChanges {
                name,
                email,
                password_hash,
                profile: payload.profile,
            };
            Profile::Mentor(
                state
                    .repo
                    .update_mentor(principal.subject_id, changes)
                    .await?
                    .ok_or_else(|| AppError::not_found("mentor"))?,
            )
        }
    };

    tracing::info!(subject = %principal.subject_id, role = %principal.role, "profile updated");
    Ok(Json(profile))
}

// --- Projects ---

/// list_projects
///
/// [Authenticated Route] Role-scoped project listing, newest first.
///
/// * student: approved projects only
/// * mentor: projects assigned to the caller
/// * admin: every project, optionally filtered by `?status=`
#[utoipa::path(
    get,
    path = "/projects",
    params(ProjectQuery),
    responses((status = 200, description = "Projects visible to the caller", body = [Project]))
)]
pub async fn list_projects(
    principal: Principal,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ProjectQuery>,
) -> Result<Json<Vec<Project>>, AppError> {
    let filter = match principal.role {
        Role::Admin => ProjectFilter {
            status: query.status,
            ..Default::default()
        },
        Role::Mentor => ProjectFilter {
            mentor_id: Some(principal.subject_id),
            ..Default::default()
        },
        Role::Student => ProjectFilter {
            status: Some(ProjectStatus::Approved),
            ..Default::default()
        },
    };
    Ok(Json(state.repo.list_projects(filter).await?))
}

/// get_project
///
/// [Authenticated Route] A single project, subject to the same visibility
/// rules as the listing (plus a student's own applications).
#[utoipa::path(
    get,
    path = "/projects/{id}",
    responses(
        (status = 200, description = "Project", body = Project),
        (status = 404, description = "Unknown or not visible", body = MessageBody)
    )
)]
pub async fn get_project(
    principal: Principal,
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Project>, AppError> {
    let project = state
        .repo
        .get_project(id)
        .await?
        .filter(|p| visible_to(p, &principal))
        .ok_or_else(|| AppError::not_found("project"))?;
    Ok(Json(project))
}

/// create_project
///
/// [Staff Route] Proposes a project. It starts `pending`, with no mentor and
/// no applicants, and waits for an admin decision.
#[utoipa::path(
    post,
    path = "/projects",
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 400, description = "Invalid fields", body = ValidationErrorBody),
        (status = 403, description = "Students cannot propose projects", body = MessageBody)
    )
)]
pub async fn create_project(
    principal: Principal,
    State(state): State<AppState>,
    AppJson(payload): AppJson<CreateProjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let project = state
        .repo
        .create_project(NewProject {
            title: payload.title.trim().to_string(),
            description: payload.description.trim().to_string(),
            technologies: payload
                .technologies
                .iter()
                .map(|t| t.trim().to_string())
                .collect(),
        })
        .await?;

    tracing::info!(project_id = %project.id, by = %principal.role, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

// --- Student Workflow ---

/// apply_to_project
///
/// [Student Route] Applies the caller to an approved project. A second
/// application to the same project is a conflict and changes nothing.
#[utoipa::path(
    post,
    path = "/projects/{id}/apply",
    responses(
        (status = 200, description = "Applied", body = Project),
        (status = 400, description = "Project is not approved", body = MessageBody),
        (status = 404, description = "Project not found", body = MessageBody),
        (status = 409, description = "Already applied", body = MessageBody)
    )
)]
pub async fn apply_to_project(
    principal: Principal,
    State(state): State<AppState>,
    AppPath(project_id): AppPath<Uuid>,
) -> Result<Json<Project>, AppError> {
    let project = state.workflow.apply(project_id, principal.subject_id).await?;
    Ok(Json(project))
}

/// list_applications
///
/// [Student Route] The caller's applications with their per-project status.
#[utoipa::path(
    get,
    path = "/applications",
    responses((status = 200, description = "Own applications", body = [ApplicationView]))
)]
pub async fn list_applications(
    principal: Principal,
    State(state): State<AppState>,
) -> Result<Json<Vec<ApplicationView>>, AppError> {
    let student = state
        .repo
        .get_student(principal.subject_id)
        .await?
        .ok_or_else(|| AppError::not_found("student"))?;

    let projects = state
        .repo
        .list_projects(ProjectFilter {
            applicant_id: Some(student.id),
            ..Default::default()
        })
        .await?;

    let views = projects
        .into_iter()
        .map(|project| ApplicationView {
            status: student
                .project_status
                .get(&project.id)
                .copied()
                .unwrap_or_default(),
            project,
        })
        .collect();
    Ok(Json(views))
}

// --- Mentor Workflow ---

/// record_progress
///
/// [Mentor Route] Appends a progress entry (and optional file references) to
/// an applicant's submission. Only the project's assigned mentor may do this.
#[utoipa::path(
    put,
    path = "/projects/{id}/progress",
    request_body = ProgressRequest,
    responses(
        (status = 200, description = "Progress recorded", body = Project),
        (status = 400, description = "Invalid fields", body = ValidationErrorBody),
        (status = 403, description = "Not the assigned mentor", body = MessageBody),
        (status = 404, description = "Project or applicant not found", body = MessageBody)
    )
)]
pub async fn record_progress(
    principal: Principal,
    State(state): State<AppState>,
    AppPath(project_id): AppPath<Uuid>,
    AppJson(payload): AppJson<ProgressRequest>,
) -> Result<Json<Project>, AppError> {
    payload.validate()?;

    let entry = ProgressEntry {
        percentage: payload.percentage,
        milestone: payload.milestone.trim().to_string(),
        comment: payload.comment,
        files: payload.files,
    };
    let project = state
        .workflow
        .record_progress(project_id, principal.subject_id, payload.student_id, entry)
        .await?;
    Ok(Json(project))
}

// --- Admin Workflow ---

/// approve_project
///
/// [Admin Route] `pending` → `approved`. Every applicant is notified.
#[utoipa::path(
    put,
    path = "/projects/{id}/approve",
    responses(
        (status = 200, description = "Approved", body = Project),
        (status = 400, description = "Project is not pending", body = MessageBody),
        (status = 404, description = "Project not found", body = MessageBody)
    )
)]
pub async fn approve_project(
    State(state): State<AppState>,
    AppPath(project_id): AppPath<Uuid>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(state.workflow.approve(project_id).await?))
}

/// reject_project
///
/// [Admin Route] `pending` → `rejected`. Every applicant is notified.
#[utoipa::path(
    put,
    path = "/projects/{id}/reject",
    responses(
        (status = 200, description = "Rejected", body = Project),
        (status = 400, description = "Project is not pending", body = MessageBody),
        (status = 404, description = "Project not found", body = MessageBody)
    )
)]
pub async fn reject_project(
    State(state): State<AppState>,
    AppPath(project_id): AppPath<Uuid>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(state.workflow.reject(project_id).await?))
}

/// assign_mentor
///
/// [Admin Route] Sets the project's mentor in any status. The new mentor and
/// the replaced one (if any) are notified.
#[utoipa::path(
    put,
    path = "/projects/{id}/assign-mentor",
    request_body = AssignMentorRequest,
    responses(
        (status = 200, description = "Mentor assigned", body = Project),
        (status = 404, description = "Project or mentor not found", body = MessageBody)
    )
)]
pub async fn assign_mentor(
    State(state): State<AppState>,
    AppPath(project_id): AppPath<Uuid>,
    AppJson(payload): AppJson<AssignMentorRequest>,
) -> Result<Json<Project>, AppError> {
    let project = state
        .workflow
        .assign_mentor(project_id, payload.mentor_id)
        .await?;
    Ok(Json(project))
}

// --- Account Provisioning ---

/// list_students
///
/// [Admin Route]
#[utoipa::path(
    get,
    path = "/students",
    responses((status = 200, description = "All students", body = [Student]))
)]
pub async fn list_students(State(state): State<AppState>) -> Result<Json<Vec<Student>>, AppError> {
    Ok(Json(state.repo.list_students().await?))
}

/// add_student
///
/// [Admin Route] Creates a student account with a generated one-time password.
/// The plaintext password only ever leaves the server in the welcome email.
#[utoipa::path(
    post,
    path = "/add-student",
    request_body = AddStudentRequest,
    responses(
        (status = 201, description = "Student created", body = Student),
        (status = 400, description = "Invalid fields", body = ValidationErrorBody),
        (status = 409, description = "Email or roll number taken", body = MessageBody)
    )
)]
pub async fn add_student(
    State(state): State<AppState>,
    AppJson(payload): AppJson<AddStudentRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let password = generate_password();
    let student = state
        .repo
        .create_student(NewStudent {
            name: payload.name.trim().to_string(),
            roll_no: payload.roll_no.trim().to_string(),
            course: payload.course.trim().to_string(),
            section: payload.section.trim().to_string(),
            email: normalize_email(&payload.email),
            password_hash: hash_password(&password).await?,
        })
        .await?;

    tracing::info!(student_id = %student.id, "student account created");
    let email = notify::welcome_email(&student.email, &student.name, Role::Student.as_str(), &password);
    state.outbox.send(email);

    Ok((StatusCode::CREATED, Json(student)))
}

/// update_student
///
/// [Admin Route] Partial update; may also link the student to a mentor.
#[utoipa::path(
    put,
    path = "/update-student/{id}",
    request_body = UpdateStudentRequest,
    responses(
        (status = 200, description = "Student updated", body = Student),
        (status = 400, description = "Invalid fields", body = ValidationErrorBody),
        (status = 404, description = "Student or mentor not found", body = MessageBody),
        (status = 409, description = "Email or roll number taken", body = MessageBody)
    )
)]
pub async fn update_student(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateStudentRequest>,
) -> Result<Json<Student>, AppError> {
    payload.validate()?;

    if let Some(mentor_id) = payload.mentor_id {
        if state.repo.get_mentor(mentor_id).await?.is_none() {
            return Err(AppError::not_found("mentor"));
        }
    }

    let changes = StudentChanges {
        name: payload.name.map(|v| v.trim().to_string()),
        roll_no: payload.roll_no.map(|v| v.trim().to_string()),
        course: payload.course.map(|v| v.trim().to_string()),
        section: payload.section.map(|v| v.trim().to_string()),
        email: payload.email.as_deref().map(normalize_email),
        mentor_id: payload.mentor_id,
        ..Default::default()
    };
    let student = state
        .repo
        .update_student(id, changes)
        .await?
        .ok_or_else(|| AppError::not_found("student"))?;
    Ok(Json(student))
}

/// delete_student
///
/// [Admin Route] Hard delete. The student's applications go with it.
#[utoipa::path(
    delete,
    path = "/delete-student/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Student not found", body = MessageBody)
    )
)]
pub async fn delete_student(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.repo.delete_student(id).await? {
        tracing::info!(student_id = %id, "student deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("student"))
    }
}

/// list_mentors
///
/// [Admin Route]
#[utoipa::path(
    get,
    path = "/mentors",
    responses((status = 200, description = "All mentors", body = [Mentor]))
)]
pub async fn list_mentors(State(state): State<AppState>) -> Result<Json<Vec<Mentor>>, AppError> {
    Ok(Json(state.repo.list_mentors().await?))
}

/// add_mentor
///
/// [Admin Route] Creates a mentor account; same password handling as `add_student`.
#[utoipa::path(
    post,
    path = "/add-mentor",
    request_body = AddMentorRequest,
    responses(
        (status = 201, description = "Mentor created", body = Mentor),
        (status = 400, description = "Invalid fields", body = ValidationErrorBody),
        (status = 409, description = "Email taken", body = MessageBody)
    )
)]
pub async fn add_mentor(
    State(state): State<AppState>,
    AppJson(payload): AppJson<AddMentorRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let password = generate_password();
    let mentor = state
        .repo
        .create_mentor(NewMentor {
            name: payload.name.trim().to_string(),
            email: normalize_email(&payload.email),
            password_hash: hash_password(&password).await?,
        })
        .await?;

    tracing::info!(mentor_id = %mentor.id, "mentor account created");
    let email = notify::welcome_email(&mentor.email, &mentor.name, Role::Mentor.as_str(), &password);
    state.outbox.send(email);

    Ok((StatusCode::CREATED, Json(mentor)))
}

#[utoipa::path(
    put,
    path = "/update-mentor/{id}",
    request_body = UpdateMentorRequest,
    responses(
        (status = 200, description = "Mentor updated", body = Mentor),
        (status = 400, description = "Invalid fields", body = ValidationErrorBody),
        (status = 404, description = "Mentor not found", body = MessageBody),
        (status = 409, description = "Email taken", body = MessageBody)
    )
)]
pub async fn update_mentor(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateMentorRequest>,
) -> Result<Json<Mentor>, AppError> {
    payload.validate()?;

    let changes = MentorChanges {
        name: payload.name.map(|v| v.trim().to_string()),
        email: payload.email.as_deref().map(normalize_email),
        ..Default::default()
    };
    let mentor = state
        .repo
        .update_mentor(id, changes)
        .await?
        .ok_or_else(|| AppError::not_found("mentor"))?;
    Ok(Json(mentor))
}

/// delete_mentor
///
/// [Admin Route] Hard delete. Projects and students referencing the mentor
/// are left without one.
#[utoipa::path(
    delete,
    path = "/delete-mentor/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Mentor not found", body = MessageBody)
    )
)]
pub async fn delete_mentor(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.repo.delete_mentor(id).await? {
        tracing::info!(mentor_id = %id, "mentor deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("mentor"))
    }
}
