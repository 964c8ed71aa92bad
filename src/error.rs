use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::{filter_compiler::CompileError, notion::ProviderError, store::PersistenceError};

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message)
    }

    pub fn session_not_found(session_id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "SESSION_NOT_FOUND",
            format!("Session {session_id} not found."),
        )
    }

    pub fn send_in_progress() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "SEND_IN_PROGRESS",
            "A message is already being sent for this session.",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": {
                    "code": self.code,
                    "message": self.message
                }
            })),
        )
            .into_response()
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "NOTION_PROVIDER_ERROR", err.message)
    }
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::ThreadNotFound(id) => Self::new(
                StatusCode::NOT_FOUND,
                "THREAD_NOT_FOUND",
                format!("Thread {id} not found."),
            ),
            PersistenceError::Unavailable(reason) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "PERSISTENCE_UNAVAILABLE",
                format!("Chat storage is unavailable: {reason}"),
            ),
            PersistenceError::Sqlite(err) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "PERSISTENCE_ERROR",
                format!("Failed to persist chat data: {err}"),
            ),
        }
    }
}

impl From<CompileError> for ApiError {
    fn from(err: CompileError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "FILTER_COMPILATION_FAILED",
            err.to_string(),
        )
    }
}
