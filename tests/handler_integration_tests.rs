use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use mentor_portal::{
    AppConfig, AppError, AppState,
    auth::{ADMIN_SUBJECT_ID, Principal},
    extract::{AppJson, AppPath, AppQuery},
    handlers::{self, ProjectQuery},
    models::{
        AddMentorRequest, AddStudentRequest, CreateProjectRequest, LoginRequest, Mentor, Profile,
        Project, ProjectStatus, Role, Student, UpdateMentorRequest, UpdateProfileRequest,
        UpdateStudentRequest,
    },
    notify::MockNotifier,
    repository::{InMemoryRepository, NewProject, RepositoryState},
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

// --- Helper Functions ---

fn create_test_state() -> (AppState, MockNotifier) {
    let notifier = MockNotifier::new();
    let repo: RepositoryState = Arc::new(InMemoryRepository::new());
    let state = AppState::new(repo, Arc::new(notifier.clone()), AppConfig::default());
    (state, notifier)
}

fn admin() -> Principal {
    Principal {
        subject_id: ADMIN_SUBJECT_ID,
        role: Role::Admin,
    }
}

async fn json_body<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let body = response.into_body();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).expect("Failed to deserialize JSON response from handler")
}

/// The one-time password is only ever sent in the welcome email.
fn password_from_welcome(notifier: &MockNotifier, email: &str) -> String {
    let welcome = notifier.sent_to(email);
    let body = &welcome.last().expect("welcome email sent").body;
    body.lines()
        .find_map(|l| l.strip_prefix("Password: "))
        .expect("password line in welcome email")
        .trim()
        .to_string()
}

async fn add_student(state: &AppState, n: u32) -> Student {
    let response = handlers::add_student(
        State(state.clone()),
        AppJson(AddStudentRequest {
            name: format!("Student {n}"),
            roll_no: format!("R-{n:03}"),
            course: "CS".into(),
            section: "B".into(),
            email: format!("Student{n}@Uni.Example.EDU "),
        }),
    )
    .await
    .unwrap()
    .into_response();
    assert_eq!(response.status(), StatusCode::CREATED);
    // Welcome emails go out in the background.
    state.outbox.flush().await;
    json_body(response).await
}

async fn add_mentor(state: &AppState, n: u32) -> Mentor {
    let response = handlers::add_mentor(
        State(state.clone()),
        AppJson(AddMentorRequest {
            name: format!("Mentor {n}"),
            email: format!("mentor{n}@uni.example.edu"),
        }),
    )
    .await
    .unwrap()
    .into_response();
    assert_eq!(response.status(), StatusCode::CREATED);
    // Welcome emails go out in the background.
    state.outbox.flush().await;
    json_body(response).await
}

// --- Provisioning & Login ---

#[tokio::test]
async fn test_add_student_normalizes_email_and_sends_password() {
    let (state, notifier) = create_test_state();
    let student = add_student(&state, 1).await;

    assert_eq!(student.email, "student1@uni.example.edu");
    assert!(student.applied_projects.is_empty());

    let password = password_from_welcome(&notifier, &student.email);
    assert_eq!(password.len(), 12);
    assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));

    // The generated password works for login.
    let Json(login) = handlers::login(
        State(state.clone()),
        AppPath(Role::Student),
        AppJson(LoginRequest {
            email: "STUDENT1@uni.example.edu".into(),
            password,
        }),
    )
    .await
    .unwrap();
    assert_eq!(login.role, Role::Student);
    assert_eq!(login.expires_in, 3600);
    let principal = state.tokens.verify(&login.token).unwrap();
    assert_eq!(principal.subject_id, student.id);
}

#[tokio::test]
async fn test_add_student_duplicate_email_conflicts() {
    let (state, _) = create_test_state();
    add_student(&state, 1).await;

    let result = handlers::add_student(
        State(state.clone()),
        AppJson(AddStudentRequest {
            name: "Other".into(),
            roll_no: "R-999".into(),
            course: "CS".into(),
            section: "B".into(),
            email: "student1@uni.example.edu".into(),
        }),
    )
    .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn test_add_student_rejects_invalid_fields() {
    let (state, notifier) = create_test_state();
    let result = handlers::add_student(
        State(state.clone()),
        AppJson(AddStudentRequest {
            name: "".into(),
            email: "nope".into(),
            ..Default::default()
        }),
    )
    .await;

    assert!(matches!(result, Err(AppError::Validation(problems)) if problems.len() == 5));
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn test_login_with_wrong_password_or_role_fails() {
    let (state, _) = create_test_state();
    let mentor = add_mentor(&state, 1).await;

    let wrong_password = handlers::login(
        State(state.clone()),
        AppPath(Role::Mentor),
        AppJson(LoginRequest {
            email: mentor.email.clone(),
            password: "wrong-password-1".into(),
        }),
    )
    .await;
    assert!(matches!(wrong_password, Err(AppError::InvalidCredentials)));

    // A mentor account cannot log in through the student endpoint.
    let wrong_role = handlers::login(
        State(state.clone()),
        AppPath(Role::Student),
        AppJson(LoginRequest {
            email: mentor.email.clone(),
            password: "whatever1".into(),
        }),
    )
    .await;
    assert!(matches!(wrong_role, Err(AppError::InvalidCredentials)));
}

#[tokio::test]
async fn test_admin_login_uses_configured_credentials() {
    let (state, _) = create_test_state();
    let Json(login) = handlers::login(
        State(state.clone()),
        AppPath(Role::Admin),
        AppJson(LoginRequest {
            email: state.config.admin.email.clone(),
            password: state.config.admin.password.clone(),
        }),
    )
    .await
    .unwrap();

    let principal = state.tokens.verify(&login.token).unwrap();
    assert_eq!(principal, admin());

    let bad = handlers::login(
        State(state.clone()),
        AppPath(Role::Admin),
        AppJson(LoginRequest {
            email: state.config.admin.email.clone(),
            password: "not-the-password".into(),
        }),
    )
    .await;
    assert!(matches!(bad, Err(AppError::InvalidCredentials)));
}

// --- Profile ---

#[tokio::test]
async fn test_profile_update_rehashes_password() {
    let (state, _) = create_test_state();
    let student = add_student(&state, 1).await;
    let me = Principal {
        subject_id: student.id,
        role: Role::Student,
    };

    let mut extra = serde_json::Map::new();
    extra.insert("github".into(), serde_json::json!("ada-l"));
    let Json(profile) = handlers::update_profile(
        me,
        State(state.clone()),
        AppJson(UpdateProfileRequest {
            name: Some("Ada".into()),
            password: Some("newpass123".into()),
            profile: Some(extra),
            ..Default::default()
        }),
    )
    .await
    .unwrap();

    let Profile::Student(updated) = profile else {
        panic!("student profile expected");
    };
    assert_eq!(updated.name, "Ada");
    assert_eq!(updated.profile.get("github"), Some(&serde_json::json!("ada-l")));

    let login = handlers::login(
        State(state.clone()),
        AppPath(Role::Student),
        AppJson(LoginRequest {
            email: student.email.clone(),
            password: "newpass123".into(),
        }),
    )
    .await;
    assert!(login.is_ok());
}

#[tokio::test]
async fn test_profile_update_enforces_password_policy() {
    let (state, _) = create_test_state();
    let mentor = add_mentor(&state, 1).await;
    let me = Principal {
        subject_id: mentor.id,
        role: Role::Mentor,
    };

    let result = handlers::update_profile(
        me,
        State(state.clone()),
        AppJson(UpdateProfileRequest {
            password: Some("short".into()),
            ..Default::default()
        }),
    )
    .await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn test_admin_profile_is_static_and_read_only() {
    let (state, _) = create_test_state();

    let Json(profile) = handlers::get_profile(admin(), State(state.clone())).await.unwrap();
    match profile {
        Profile::Admin(a) => assert_eq!(a.email, state.config.admin.email),
        other => panic!("unexpected profile {:?}", other),
    }

    let result = handlers::update_profile(
        admin(),
        State(state.clone()),
        AppJson(UpdateProfileRequest {
            name: Some("Root".into()),
            ..Default::default()
        }),
    )
    .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

// --- Projects ---

async fn seed_project(state: &AppState, title: &str) -> Project {
    state
        .repo
        .create_project(NewProject {
            title: title.into(),
            description: "desc".into(),
            technologies: vec![],
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_project_starts_pending_without_mentor() {
    let (state, _) = create_test_state();
    let mentor = add_mentor(&state, 1).await;
    let me = Principal {
        subject_id: mentor.id,
        role: Role::Mentor,
    };

    let response = handlers::create_project(
        me,
        State(state.clone()),
        AppJson(CreateProjectRequest {
            title: "  Weather station ".into(),
            description: "Sensors and a dashboard".into(),
            technologies: vec!["rust".into(), " embedded ".into()],
        }),
    )
    .await
    .unwrap()
    .into_response();
    assert_eq!(response.status(), StatusCode::CREATED);

    let project: Project = json_body(response).await;
    assert_eq!(project.title, "Weather station");
    assert_eq!(project.status, ProjectStatus::Pending);
    assert_eq!(project.mentor_id, None);
    assert!(project.students_applied.is_empty());
    assert_eq!(project.technologies, vec!["rust".to_string(), "embedded".to_string()]);
}

#[tokio::test]
async fn test_project_listing_is_scoped_by_role() {
    let (state, _) = create_test_state();
    let mentor = add_mentor(&state, 1).await;
    let student = add_student(&state, 1).await;

    let pending = seed_project(&state, "pending").await;
    let approved = seed_project(&state, "approved").await;
    state.workflow.approve(approved.id).await.unwrap();
    state.workflow.assign_mentor(pending.id, mentor.id).await.unwrap();

    let as_student = Principal {
        subject_id: student.id,
        role: Role::Student,
    };
    let Json(list) = handlers::list_projects(as_student, State(state.clone()), AppQuery(ProjectQuery::default()))
        .await
        .unwrap();
    assert_eq!(list.iter().map(|p| p.id).collect::<Vec<_>>(), vec![approved.id]);

    let as_mentor = Principal {
        subject_id: mentor.id,
        role: Role::Mentor,
    };
    let Json(list) = handlers::list_projects(as_mentor, State(state.clone()), AppQuery(ProjectQuery::default()))
        .await
        .unwrap();
    assert_eq!(list.iter().map(|p| p.id).collect::<Vec<_>>(), vec![pending.id]);

    // Admin sees everything, newest first, or filters by status.
    let Json(list) = handlers::list_projects(admin(), State(state.clone()), AppQuery(ProjectQuery::default()))
        .await
        .unwrap();
    assert_eq!(list.iter().map(|p| p.id).collect::<Vec<_>>(), vec![approved.id, pending.id]);
    let Json(list) = handlers::list_projects(
        admin(),
        State(state.clone()),
        AppQuery(ProjectQuery {
            status: Some(ProjectStatus::Pending),
        }),
    )
    .await
    .unwrap();
    assert_eq!(list.iter().map(|p| p.id).collect::<Vec<_>>(), vec![pending.id]);

    // A pending project is hidden from students.
    let hidden = handlers::get_project(as_student, State(state.clone()), AppPath(pending.id)).await;
    assert!(matches!(hidden, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_applications_list_carries_status() {
    let (state, _) = create_test_state();
    let student = add_student(&state, 1).await;
    let p = seed_project(&state, "p").await;
    state.workflow.approve(p.id).await.unwrap();

    let me = Principal {
        subject_id: student.id,
        role: Role::Student,
    };
    let Json(applied) = handlers::apply_to_project(me, State(state.clone()), AppPath(p.id))
        .await
        .unwrap();
    assert!(applied.has_applicant(student.id));

    let Json(apps) = handlers::list_applications(me, State(state.clone())).await.unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].project.id, p.id);
    assert_eq!(apps[0].status, mentor_portal::models::ApplicationStatus::Applied);
}

// --- Account Maintenance ---

#[tokio::test]
async fn test_update_student_links_existing_mentor_only() {
    let (state, _) = create_test_state();
    let student = add_student(&state, 1).await;
    let mentor = add_mentor(&state, 1).await;

    let Json(updated) = handlers::update_student(
        State(state.clone()),
        AppPath(student.id),
        AppJson(UpdateStudentRequest {
            mentor_id: Some(mentor.id),
            section: Some("C".into()),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(updated.mentor_id, Some(mentor.id));
    assert_eq!(updated.section, "C");
    assert_eq!(updated.name, student.name);

    let missing_mentor = handlers::update_student(
        State(state.clone()),
        AppPath(student.id),
        AppJson(UpdateStudentRequest {
            mentor_id: Some(Uuid::new_v4()),
            ..Default::default()
        }),
    )
    .await;
    assert!(matches!(missing_mentor, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_student_cascades_applications() {
    let (state, _) = create_test_state();
    let student = add_student(&state, 1).await;
    let p = seed_project(&state, "p").await;
    state.workflow.approve(p.id).await.unwrap();
    state.workflow.apply(p.id, student.id).await.unwrap();

    let status = handlers::delete_student(State(state.clone()), AppPath(student.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);

    let project = state.repo.get_project(p.id).await.unwrap().unwrap();
    assert!(project.students_applied.is_empty());

    let again = handlers::delete_student(State(state.clone()), AppPath(student.id)).await;
    assert!(matches!(again, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_mentor_clears_references() {
    let (state, _) = create_test_state();
    let mentor = add_mentor(&state, 1).await;
    let student = add_student(&state, 1).await;
    let p = seed_project(&state, "p").await;
    state.workflow.assign_mentor(p.id, mentor.id).await.unwrap();
    let _linked = handlers::update_student(
        State(state.clone()),
        AppPath(student.id),
        AppJson(UpdateStudentRequest {
            mentor_id: Some(mentor.id),
            ..Default::default()
        }),
    )
    .await
    .unwrap();

    let status = handlers::delete_mentor(State(state.clone()), AppPath(mentor.id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);

    let project = state.repo.get_project(p.id).await.unwrap().unwrap();
    assert_eq!(project.mentor_id, None);
    let student = state.repo.get_student(student.id).await.unwrap().unwrap();
    assert_eq!(student.mentor_id, None);
}

// --- Uniqueness ---

#[tokio::test]
async fn test_add_student_duplicate_roll_number_conflicts() {
    let (state, notifier) = create_test_state();
    add_student(&state, 1).await;

    let result = handlers::add_student(
        State(state.clone()),
        AppJson(AddStudentRequest {
            name: "Other".into(),
            roll_no: " R-001 ".into(),
            course: "CS".into(),
            section: "B".into(),
            email: "other@uni.example.edu".into(),
        }),
    )
    .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    state.outbox.flush().await;
    assert!(notifier.sent_to("other@uni.example.edu").is_empty());
    assert_eq!(state.repo.list_students().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_add_mentor_duplicate_email_conflicts() {
    let (state, _) = create_test_state();
    add_mentor(&state, 1).await;

    let result = handlers::add_mentor(
        State(state.clone()),
        AppJson(AddMentorRequest {
            name: "Same Address".into(),
            email: "MENTOR1@uni.example.edu".into(),
        }),
    )
    .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert_eq!(state.repo.list_mentors().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_student_cannot_take_another_students_email_or_roll_number() {
    let (state, _) = create_test_state();
    let first = add_student(&state, 1).await;
    let second = add_student(&state, 2).await;

    let email_clash = handlers::update_student(
        State(state.clone()),
        AppPath(second.id),
        AppJson(UpdateStudentRequest {
            email: Some(first.email.to_uppercase()),
            ..Default::default()
        }),
    )
    .await;
    assert!(matches!(email_clash, Err(AppError::Conflict(_))));

    let roll_clash = handlers::update_student(
        State(state.clone()),
        AppPath(second.id),
        AppJson(UpdateStudentRequest {
            roll_no: Some(first.roll_no.clone()),
            ..Default::default()
        }),
    )
    .await;
    assert!(matches!(roll_clash, Err(AppError::Conflict(_))));

    let unchanged = state.repo.get_student(second.id).await.unwrap().unwrap();
    assert_eq!(unchanged.email, second.email);
    assert_eq!(unchanged.roll_no, second.roll_no);

    // Re-submitting a student's own values is not a clash.
    let Json(same) = handlers::update_student(
        State(state.clone()),
        AppPath(second.id),
        AppJson(UpdateStudentRequest {
            email: Some(second.email.clone()),
            roll_no: Some(second.roll_no.clone()),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(same.email, second.email);
}

#[tokio::test]
async fn test_update_mentor_email_clash_conflicts() {
    let (state, _) = create_test_state();
    let first = add_mentor(&state, 1).await;
    let second = add_mentor(&state, 2).await;

    let result = handlers::update_mentor(
        State(state.clone()),
        AppPath(second.id),
        AppJson(UpdateMentorRequest {
            email: Some(first.email.clone()),
            ..Default::default()
        }),
    )
    .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    let unchanged = state.repo.get_mentor(second.id).await.unwrap().unwrap();
    assert_eq!(unchanged.email, second.email);
}

#[tokio::test]
async fn test_profile_update_email_clash_conflicts() {
    let (state, _) = create_test_state();
    let first = add_student(&state, 1).await;
    let second = add_student(&state, 2).await;
    let me = Principal {
        subject_id: second.id,
        role: Role::Student,
    };

    let result = handlers::update_profile(
        me,
        State(state.clone()),
        AppJson(UpdateProfileRequest {
            email: Some(format!(" {} ", first.email)),
            ..Default::default()
        }),
    )
    .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    let unchanged = state.repo.get_student(second.id).await.unwrap().unwrap();
    assert_eq!(unchanged.email, second.email);
}
