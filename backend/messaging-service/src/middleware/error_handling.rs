use crate::error::AppError;
use actix_web::{error::JsonPayloadError, http::StatusCode, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub mod codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
    pub const NOT_A_PARTICIPANT: &str = "NOT_A_PARTICIPANT";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Map domain errors to HTTP responses. Server-side failures never leak
/// their detail to the client.
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::InvalidInput(_) => ("validation_error", codes::INVALID_REQUEST),
        AppError::Unauthenticated => ("authentication_error", codes::UNAUTHENTICATED),
        AppError::Unauthorized => ("authorization_error", codes::NOT_A_PARTICIPANT),
        AppError::NotFound => ("not_found_error", codes::NOT_FOUND),
        AppError::Database(sqlx::Error::PoolTimedOut) => {
            ("service_unavailable_error", codes::SERVICE_UNAVAILABLE)
        }
        AppError::Database(_) => ("server_error", codes::DATABASE_ERROR),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => {
            ("server_error", codes::INTERNAL_SERVER_ERROR)
        }
    };

    let message = match err {
        AppError::InvalidInput(_)
        | AppError::Unauthenticated
        | AppError::Unauthorized
        | AppError::NotFound => err.to_string(),
        AppError::Database(sqlx::Error::PoolTimedOut) => {
            "Service temporarily unavailable".to_string()
        }
        _ => {
            tracing::error!(error = %err, "request failed");
            "Internal server error".to_string()
        }
    };

    let response = ErrorResponse::new(
        status.canonical_reason().unwrap_or("Error"),
        &message,
        status.as_u16(),
        error_type,
        code,
    );

    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, response) = map_error(err);
    HttpResponse::build(status).json(response)
}

/// Malformed JSON bodies render like every other `InvalidInput`.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: JsonPayloadError, _req: &HttpRequest| {
        AppError::InvalidInput(format!("Invalid request body: {err}")).into()
    })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        AppError::InvalidInput(format!("Invalid query string: {err}")).into()
    })
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _req| {
        AppError::InvalidInput(format!("Invalid path: {err}")).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_keeps_specific_message() {
        let (status, body) = map_error(&AppError::InvalidInput("Message too long".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.message, "Message too long");
        assert_eq!(body.error_type, "validation_error");
    }

    #[test]
    fn non_participant_is_generic_forbidden() {
        let (status, body) = map_error(&AppError::Unauthorized);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.code, codes::NOT_A_PARTICIPANT);
        assert!(!body.message.to_lowercase().contains("not found"));
    }

    #[test]
    fn database_detail_is_hidden() {
        let (status, body) = map_error(&AppError::Database(sqlx::Error::RowNotFound));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "Internal server error");

        let (status, body) = map_error(&AppError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error_type, "service_unavailable_error");
    }

    #[test]
    fn wire_shape_uses_type_key() {
        let (_, body) = map_error(&AppError::NotFound);
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["type"], "not_found_error");
        assert_eq!(value["status"], 404);
    }
}
