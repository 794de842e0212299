#![allow(dead_code)]

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Terminal failures of a single analysis. None of them are retried; each
/// leaves the session usable for another attempt.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Completion request failed: {0}")]
    Request(String),

    #[error("Completion stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl AnalysisError {
    /// Stable code sent to clients alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Upload(_) => "upload_error",
            AnalysisError::Extraction(_) => "extraction_error",
            AnalysisError::Request(_) => "request_error",
            AnalysisError::StreamInterrupted(_) => "stream_interrupted",
        }
    }

    /// Code used in JSON error bodies, in the same vocabulary as `AppError`.
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::Upload(_) => "UPLOAD_ERROR",
            AnalysisError::Extraction(_) => "EXTRACTION_ERROR",
            AnalysisError::Request(_) => "REQUEST_ERROR",
            AnalysisError::StreamInterrupted(_) => "STREAM_INTERRUPTED",
        }
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::UnsupportedFileType(msg) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_FILE_TYPE",
                msg.clone(),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Analysis(e) => {
                tracing::error!("Analysis error: {e}");
                let status = match e {
                    AnalysisError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, e.code(), e.to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
