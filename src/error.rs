use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{cache::CacheError, mailer::MailError, repository::RepoError};

/// Challenge sent with every Basic-auth rejection, and only with those.
pub const BASIC_CHALLENGE: &str = r#"Basic realm="restricted", charset="UTF-8""#;

/// AppError
///
/// The boundary taxonomy. Every lower-layer failure is classified into exactly one
/// of these kinds before it reaches a client; raw store/driver errors never do.
#[derive(Error, Debug)]
pub enum AppError {
    /// Payload failed shape/format checks.
    #[error("{0}")]
    Validation(String),

    /// Bearer authentication failed. Carries no detail.
    #[error("unauthorized")]
    Unauthenticated,

    /// Basic authentication failed; carries the `WWW-Authenticate` challenge.
    #[error("unauthorized")]
    BasicChallenge,

    #[error("forbidden")]
    Forbidden,

    /// Unique constraint violation (duplicate email/username).
    #[error("{0}")]
    Conflict(String),

    #[error("not found")]
    NotFound,

    #[error("failed to {operation}")]
    Internal { operation: String },
}

impl AppError {
    pub fn internal(operation: impl Into<String>) -> Self {
        AppError::Internal {
            operation: operation.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated | AppError::BasicChallenge => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe message, without leaking internal implementation details.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Internal { .. } => "the server encountered a problem".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => AppError::NotFound,
            RepoError::DuplicateEmail => AppError::Conflict("a user with that email already exists".into()),
            RepoError::DuplicateUsername => AppError::Conflict("a user with that username already exists".into()),
            RepoError::Timeout => AppError::internal("complete store call within timeout"),
            RepoError::Database(e) => AppError::internal(format!("query store: {e}")),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::internal(format!("access identity cache: {err}"))
    }
}

impl From<MailError> for AppError {
    fn from(err: MailError) -> Self {
        AppError::internal(format!("send email: {err}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Internal { .. } => tracing::error!("Internal service error: {}", self),
            AppError::Conflict(_) => tracing::warn!("Conflict error: {}", self),
            AppError::Unauthenticated | AppError::BasicChallenge | AppError::Forbidden => {
                tracing::info!("Auth rejection: {:?}", self)
            }
            AppError::Validation(_) | AppError::NotFound => tracing::debug!("Client error: {}", self),
        }

        let status = self.status_code();
        let body = Json(json!({ "error": self.user_message() }));

        let mut response = (status, body).into_response();
        if matches!(self, AppError::BasicChallenge) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(BASIC_CHALLENGE),
            );
        }
        response
    }
}
