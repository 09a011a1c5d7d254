use crate::services::{
    auth::AuthError, object_store::StorageError, shot_repository::RepoError,
    shot_service::UploadError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Generic message returned for any upstream (storage or database) failure.
pub const SERVER_ERROR_MESSAGE: &str = "Server error";

/// A lightweight wrapper for general errors that keeps the message local.
///
/// Rendered as `{ "message": ..., "status": ... }`, which is the shape the
/// browser client reads toast text from.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "message": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("unhandled error: {:#}", err);
        AppError::internal(SERVER_ERROR_MESSAGE)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken => AppError::unauthorized("No token found"),
            other => {
                tracing::warn!("token verification failed: {}", other);
                AppError::unauthorized("Invalid token")
            }
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        tracing::error!("object storage error: {}", err);
        AppError::internal(SERVER_ERROR_MESSAGE)
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => AppError::not_found("Shot not found"),
            RepoError::AlreadyAnalyzed => {
                AppError::new(StatusCode::CONFLICT, "Shot has already been analyzed")
            }
            RepoError::Sqlx(err) => {
                tracing::error!("database error: {}", err);
                AppError::internal(SERVER_ERROR_MESSAGE)
            }
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::NoFile => AppError::bad_request("No file uploaded"),
            UploadError::DuplicateVideo => {
                AppError::bad_request("Only one video file may be uploaded")
            }
            UploadError::InvalidHand(value) => {
                AppError::bad_request(format!("Invalid hand value `{}`", value))
            }
            UploadError::TooLarge { limit } => AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("File exceeds the {} byte upload limit", limit),
            ),
            UploadError::Multipart { status, message } => AppError::new(status, message),
            UploadError::Spool(err) => {
                tracing::error!("failed to spool upload: {}", err);
                AppError::internal(SERVER_ERROR_MESSAGE)
            }
            UploadError::Storage(err) => err.into(),
            UploadError::Repo(err) => err.into(),
        }
    }
}
