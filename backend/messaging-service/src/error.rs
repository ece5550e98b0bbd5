use crate::middleware::error_handling;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("unauthenticated")]
    Unauthenticated,

    /// Caller is not a participant. Deliberately says nothing about whether the
    /// conversation exists.
    #[error("not allowed to access this conversation")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(errors.to_string())
    }
}

impl AppError {
    /// Returns whether this error is retryable (e.g., database connection timeout)
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(e) => {
                matches!(
                    e,
                    sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
                )
            }
            _ => false,
        }
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidInput(_) => 400,
            AppError::Unauthenticated => 401,
            AppError::Unauthorized => 403,
            AppError::NotFound => 404,
            AppError::Database(e) if matches!(e, sqlx::Error::PoolTimedOut) => 503,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AppError::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(AppError::Unauthenticated.status_code(), 401);
        assert_eq!(AppError::Unauthorized.status_code(), 403);
        assert_eq!(AppError::NotFound.status_code(), 404);
        assert_eq!(AppError::Database(sqlx::Error::RowNotFound).status_code(), 500);
        assert_eq!(AppError::Database(sqlx::Error::PoolTimedOut).status_code(), 503);
    }

    #[test]
    fn only_transient_database_errors_are_retryable() {
        assert!(AppError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!AppError::Database(sqlx::Error::RowNotFound).is_retryable());
        assert!(!AppError::InvalidInput("Message too long".into()).is_retryable());
        assert!(!AppError::Unauthorized.is_retryable());
    }
}
