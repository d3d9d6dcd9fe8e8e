use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::interview::guards::Operation;
use crate::interview::machine::SessionError;
use crate::interview::store::StoreError;
use crate::speech::SpeechError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Session unrecoverable: {0}")]
    Gone(String),

    /// Duplicate of an in-flight operation; answered as an ignored no-op.
    #[error("Duplicate {} ignored", .0.as_str())]
    Duplicate(Operation),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Speech error: {0}")]
    Speech(#[from] SpeechError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Duplicate(op) => AppError::Duplicate(op),
            SessionError::ProfileNotFound(_) | SessionError::NotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            SessionError::InvalidUserId | SessionError::WrongRound { .. } => {
                AppError::Validation(e.to_string())
            }
            SessionError::Closed(_)
            | SessionError::NoOutstandingQuestion
            | SessionError::StaleAnswer { .. }
            | SessionError::NotFinished => AppError::Conflict(e.to_string()),
            SessionError::Unrecoverable(msg) => AppError::Gone(msg),
            SessionError::Oracle(inner) => AppError::Oracle(inner.to_string()),
            SessionError::Store(StoreError::Database(inner)) => AppError::Database(inner),
            SessionError::Store(StoreError::Conflict { .. }) => AppError::Conflict(e.to_string()),
            SessionError::Store(StoreError::Corrupt(msg)) => AppError::Store(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, retryable) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), false),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                false,
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone(), false),
            AppError::Gone(msg) => {
                tracing::error!("Session unrecoverable: {msg}");
                (
                    StatusCode::GONE,
                    "SESSION_UNRECOVERABLE",
                    "This interview can no longer continue; please start a new session"
                        .to_string(),
                    false,
                )
            }
            AppError::Duplicate(op) => {
                tracing::debug!("Ignoring duplicate {}", op.as_str());
                return (
                    StatusCode::ACCEPTED,
                    Json(json!({ "ignored": true, "operation": op })),
                )
                    .into_response();
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    true,
                )
            }
            AppError::Oracle(msg) => {
                tracing::error!("Oracle error: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ORACLE_UNAVAILABLE",
                    "The interview service is temporarily unavailable".to_string(),
                    true,
                )
            }
            AppError::Speech(e) => {
                tracing::error!("Speech error: {e}");
                (
                    StatusCode::BAD_GATEWAY,
                    "SPEECH_ERROR",
                    "A speech processing error occurred".to_string(),
                    e.is_retryable(),
                )
            }
            AppError::Store(msg) => {
                tracing::error!("Store error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_ERROR",
                    "Stored session data could not be read".to_string(),
                    false,
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    false,
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "retryable": retryable
            }
        }));

        (status, body).into_response()
    }
}
