use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use thiserror::Error;

use crate::enrollment::EnrollmentError;
use crate::web::html;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("school setup required")]
    SchoolSetupRequired,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Business(EnrollmentError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable snake_case code, logged and attached to the rendered page.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_params",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthenticated => "unauthenticated",
            AppError::SchoolSetupRequired => "school_setup_required",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::Business(e) => e.code(),
            AppError::Database(_) => "db_query_failed",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthenticated | AppError::SchoolSetupRequired => StatusCode::SEE_OTHER,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) | AppError::Business(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{what} introuvable"))
    }

    /// Message safe to show to the user.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Internal(_) => {
                "Une erreur interne est survenue. Veuillez réessayer plus tard.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<EnrollmentError> for AppError {
    fn from(err: EnrollmentError) -> Self {
        match err {
            EnrollmentError::Db(e) => AppError::Database(e),
            other => AppError::Business(other),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{err:#}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Unauthenticated => return Redirect::to("/login").into_response(),
            AppError::SchoolSetupRequired => return Redirect::to("/setup").into_response(),
            AppError::Database(_) | AppError::Internal(_) => {
                tracing::error!(code = self.code(), error = %self, "request failed");
            }
            _ => {
                tracing::debug!(code = self.code(), error = %self, "request rejected");
            }
        }
        let status = self.status();
        let body = html::error_page(status, self.code(), &self.public_message());
        (status, Html(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
