use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::models::ProjectStatus;

/// AppError
///
/// The single error taxonomy of the portal. Every handler returns
/// `Result<_, AppError>` and the `IntoResponse` impl below is the only place
/// where failures are mapped onto HTTP status codes and bodies.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed input. Carries one message per offending field.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// No usable `Authorization: Bearer` header.
    #[error("authentication required")]
    Unauthenticated,

    /// Login with an unknown email or a wrong password.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// A bearer token was supplied but failed verification.
    #[error("invalid or expired token")]
    InvalidToken,

    /// The caller is authenticated but may not perform this action.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Duplicate unique field or duplicate application.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A workflow precondition on `Project.status` was violated.
    #[error("cannot {action} a project in status {from}")]
    InvalidTransition {
        from: ProjectStatus,
        action: &'static str,
    },

    #[error("too many requests, retry later")]
    RateLimited,

    /// Persistence or otherwise unexpected failure. The detail is logged,
    /// never returned to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(vec![msg.into()])
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated | AppError::InvalidCredentials | AppError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// FieldError
///
/// One entry of the validation error envelope: `{"errors": [{"msg": "..."}]}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FieldError {
    pub msg: String,
}

/// ValidationErrorBody
///
/// Body returned with 400 responses caused by field validation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidationErrorBody {
    pub errors: Vec<FieldError>,
}

/// MessageBody
///
/// Body returned with every other error status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageBody {
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::Validation(messages) => {
                let body = ValidationErrorBody {
                    errors: messages.into_iter().map(|msg| FieldError { msg }).collect(),
                };
                (status, Json(body)).into_response()
            }
            AppError::Internal(detail) => {
                // Debug builds only; release builds never emit the detail.
                if cfg!(debug_assertions) {
                    tracing::error!(%detail, "unhandled internal error");
                } else {
                    tracing::error!("unhandled internal error");
                }
                let body = MessageBody {
                    message: "Internal server error".to_string(),
                };
                (status, Json(body)).into_response()
            }
            other => {
                let body = MessageBody {
                    message: other.to_string(),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}
