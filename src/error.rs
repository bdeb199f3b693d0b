//! Error types for the rehost server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::proxy::ProxyError;
use crate::router::RouteError;
use crate::scheduler::TaskError;
use crate::upload::UploadError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing: Option<Vec<usize>>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upload(e) => e.status_code(),
            AppError::Route(e) => e.status_code(),
            AppError::Task(e) => e.status_code(),
            AppError::Proxy(e) => e.status_code(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Upload(e) => e.code(),
            AppError::Route(e) => e.code(),
            AppError::Task(e) => e.code(),
            AppError::Proxy(e) => e.code(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
            other => {
                if status.is_server_error() {
                    tracing::error!(code = other.code(), "{}", other);
                }
                other.to_string()
            }
        };

        let missing = match &self {
            AppError::Upload(UploadError::MissingChunks(missing)) => Some(missing.clone()),
            _ => None,
        };

        let body = Json(ErrorResponse {
            error,
            code: self.code(),
            missing,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::from(UploadError::MissingChunks(vec![1])).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(TaskError::TaskNotFound("t".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(RouteError::UploadFailed(crate::hosting::HostingError::Auth(
                "bad password".into()
            )))
            .status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(UploadError::Route(RouteError::UnsupportedLargeFile {
                size: 200,
                limit: 100,
                platform: crate::media::Platform::Unknown,
            }))
            .status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
