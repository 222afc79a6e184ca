use std::sync::LazyLock;

use regex::Regex;

use crate::{
    error::AppError,
    models::{
        AddMentorRequest, AddStudentRequest, CreateProjectRequest, LoginRequest, ProgressRequest,
        UpdateMentorRequest, UpdateProfileRequest, UpdateStudentRequest,
    },
};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email pattern is a valid regex")
});

pub const MIN_PASSWORD_LEN: usize = 8;

/// Validate
///
/// Declarative field checks run by handlers before any persistence call.
/// Implementations collect every failure so the client sees them all at once.
pub trait Validate {
    fn problems(&self) -> Vec<String>;

    fn validate(&self) -> Result<(), AppError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(problems))
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Password policy: at least `MIN_PASSWORD_LEN` characters, one letter and one digit.
pub fn is_valid_password(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LEN
        && password.chars().any(|c| c.is_ascii_alphabetic())
        && password.chars().any(|c| c.is_ascii_digit())
}

fn require(problems: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        problems.push(format!("{field} is required"));
    }
}

/// Canonical stored form of an email address: trimmed and lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_email(problems: &mut Vec<String>, email: &str) {
    if !is_valid_email(email.trim()) {
        problems.push("email must be a valid email address".to_string());
    }
}

fn check_optional(problems: &mut Vec<String>, field: &str, value: &Option<String>) {
    if let Some(v) = value {
        require(problems, field, v);
    }
}

impl Validate for LoginRequest {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        check_email(&mut problems, &self.email);
        require(&mut problems, "password", &self.password);
        problems
    }
}

impl Validate for CreateProjectRequest {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        require(&mut problems, "title", &self.title);
        require(&mut problems, "description", &self.description);
        if self.technologies.iter().any(|t| t.trim().is_empty()) {
            problems.push("technologies must not contain empty tags".to_string());
        }
        problems
    }
}

impl Validate for ProgressRequest {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.percentage > 100 {
            problems.push("percentage must be between 0 and 100".to_string());
        }
        require(&mut problems, "milestone", &self.milestone);
        if self.files.iter().any(|f| f.trim().is_empty()) {
            problems.push("files must not contain empty references".to_string());
        }
        problems
    }
}

impl Validate for AddStudentRequest {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        require(&mut problems, "name", &self.name);
        require(&mut problems, "roll_no", &self.roll_no);
        require(&mut problems, "course", &self.course);
        require(&mut problems, "section", &self.section);
        check_email(&mut problems, &self.email);
        problems
    }
}

impl Validate for UpdateStudentRequest {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        check_optional(&mut problems, "name", &self.name);
        check_optional(&mut problems, "roll_no", &self.roll_no);
        check_optional(&mut problems, "course", &self.course);
        check_optional(&mut problems, "section", &self.section);
        if let Some(email) = &self.email {
            check_email(&mut problems, email);
        }
        problems
    }
}

impl Validate for AddMentorRequest {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        require(&mut problems, "name", &self.name);
        check_email(&mut problems, &self.email);
        problems
    }
}

impl Validate for UpdateMentorRequest {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        check_optional(&mut problems, "name", &self.name);
        if let Some(email) = &self.email {
            check_email(&mut problems, email);
        }
        problems
    }
}

impl Validate for UpdateProfileRequest {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        check_optional(&mut problems, "name", &self.name);
        if let Some(email) = &self.email {
            check_email(&mut problems, email);
        }
        if let Some(password) = &self.password {
            if !is_valid_password(password) {
                problems.push(format!(
                    "password must be at least {MIN_PASSWORD_LEN} characters and contain a letter and a digit"
                ));
            }
        }
        problems
    }
}
