//! Error types shared by the session store, the auth controller and the CRUD
//! controller.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sea_orm::DbErr;

/// A single field that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Name of the offending field.
    pub field: String,
    /// Human readable reason, shown next to the field.
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors surfaced by admin operations.
///
/// `Forbidden` and `NotFound` deliberately carry no detail.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// One or more submitted fields could not be parsed. Every failing field
    /// is reported, not only the first one.
    #[error("invalid input: {}", join_field_errors(.0))]
    Validation(Vec<FieldError>),

    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("storage error: {0}")]
    Storage(#[from] DbErr),

    /// A model hook rejected the operation.
    #[error("hook failed: {0}")]
    Hook(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("password hashing failed: {0}")]
    Password(#[from] bcrypt::BcryptError),

    /// The client session carrying the token could not be read or written.
    #[error("session error: {0}")]
    Session(String),
}

impl AdminError {
    /// Convenience constructor for hooks.
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AdminError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AdminError::NotFound => StatusCode::NOT_FOUND,
            AdminError::Forbidden => StatusCode::FORBIDDEN,
            AdminError::Hook(_) => StatusCode::BAD_REQUEST,
            AdminError::Storage(_)
            | AdminError::Render(_)
            | AdminError::Password(_)
            | AdminError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tera::Error> for AdminError {
    fn from(err: tera::Error) -> Self {
        AdminError::Render(err.to_string())
    }
}

impl From<tower_sessions::session::Error> for AdminError {
    fn from(err: tower_sessions::session::Error) -> Self {
        AdminError::Session(err.to_string())
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "admin request failed");
        }
        let body = match &self {
            // storage and render failures are not echoed to the client
            AdminError::Storage(_) | AdminError::Render(_) | AdminError::Password(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure of the built-in username/password login flow.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("This account is disabled.")]
    Disabled,

    #[error("There was a problem logging in, please try again.")]
    InvalidCredentials,

    #[error(transparent)]
    Admin(#[from] AdminError),
}

impl From<DbErr> for LoginError {
    fn from(err: DbErr) -> Self {
        LoginError::Admin(AdminError::Storage(err))
    }
}

impl From<bcrypt::BcryptError> for LoginError {
    fn from(err: bcrypt::BcryptError) -> Self {
        LoginError::Admin(AdminError::Password(err))
    }
}
