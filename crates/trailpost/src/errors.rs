use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Authentication failed")]
    AuthFailure,

    #[error("HTTP signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Request date too far from now")]
    StaleRequest,

    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Remote server unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("Malformed actor document: {0}")]
    MalformedActor(String),

    #[error("Not found")]
    NotFound,

    #[error("Forbidden")]
    Forbidden,

    #[error("Already exists")]
    Conflict,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Transient upstream failure: {0}")]
    Transient(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error")]
    Internal,

    #[error("Queue error: {0}")]
    Queue(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code surfaced in the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Validation(_) => "validation",
            AppError::AuthFailure => "auth_failure",
            AppError::SignatureInvalid(_) => "signature_invalid",
            AppError::StaleRequest => "stale_request",
            AppError::KeyUnavailable(_) => "key_unavailable",
            AppError::RemoteUnreachable(_) => "remote_unreachable",
            AppError::MalformedActor(_) => "malformed_actor",
            AppError::NotFound => "not_found",
            AppError::Forbidden => "forbidden",
            AppError::Conflict => "conflict",
            AppError::Parse(_) => "parse_error",
            AppError::Transient(_) => "transient",
            AppError::Io(_) => "io_error",
            AppError::Internal => "internal",
            AppError::Queue(_) => "internal",
        }
    }

    /// True when a retry may succeed (5xx or network-level failures).
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_) | AppError::RemoteUnreachable(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Database(e) => {
                error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::AuthFailure => {
                (StatusCode::UNAUTHORIZED, "Authentication failed".to_string())
            }
            AppError::SignatureInvalid(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::StaleRequest => (
                StatusCode::UNAUTHORIZED,
                "Request date too far from now".to_string(),
            ),
            AppError::KeyUnavailable(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::RemoteUnreachable(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::MalformedActor(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            AppError::Conflict => (StatusCode::CONFLICT, "Already exists".to_string()),
            AppError::Parse(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Transient(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Io(e) => {
                error!("IO error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            AppError::Queue(e) => {
                error!("Queue error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

/// Maps unique-constraint violations onto `Conflict` so duplicate likes and
/// follows surface as 409 instead of 500.
pub fn map_unique_violation(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return AppError::Conflict;
        }
    }
    AppError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Transient("503".into()).is_transient());
        assert!(AppError::RemoteUnreachable("timeout".into()).is_transient());
        assert!(!AppError::Forbidden.is_transient());
        assert!(!AppError::Validation("bad".into()).is_transient());
    }

    #[test]
    fn test_stable_codes() {
        assert_eq!(
            AppError::SignatureInvalid("x".into()).code(),
            "signature_invalid"
        );
        assert_eq!(AppError::StaleRequest.code(), "stale_request");
        assert_eq!(AppError::Conflict.code(), "conflict");
    }
}
