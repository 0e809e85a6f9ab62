use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::consultation::codes::CodeError;
use crate::llm_client::LlmError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Content store error: {0}")]
    Store(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Store(msg) => {
                tracing::error!("Content store error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "STORE_ERROR",
                    "The content store could not create a record".to_string(),
                )
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

// ────────────────────────────────────────────────────────────────────────────
// Job-level failures
// ────────────────────────────────────────────────────────────────────────────

/// Category of a job failure, as reported to callers and stored with fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidDate,
    RequestRejected,
    UpstreamUnavailable,
    Timeout,
    ParseError,
    ValidationError,
    PersistenceFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidDate => "invalid_date",
            ErrorKind::RequestRejected => "request_rejected",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::PersistenceFailure => "persistence_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorized job failure. Rendered as `"{kind}: {message}"`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<CodeError> for JobError {
    fn from(err: CodeError) -> Self {
        JobError::new(ErrorKind::InvalidDate, err.to_string())
    }
}

impl From<LlmError> for JobError {
    fn from(err: LlmError) -> Self {
        let kind = match &err {
            LlmError::Timeout(_) => ErrorKind::Timeout,
            LlmError::UpstreamUnavailable { .. }
            | LlmError::Server { .. }
            | LlmError::Http(_)
            | LlmError::StreamInterrupted(_)
            | LlmError::StreamFailed(_) => ErrorKind::UpstreamUnavailable,
            LlmError::EmptyContent => ErrorKind::ParseError,
            LlmError::Rejected { .. } | LlmError::Refused(_) => ErrorKind::RequestRejected,
        };
        JobError::new(kind, err.to_string())
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err.kind {
            ErrorKind::PersistenceFailure => AppError::Store(err.message),
            _ => AppError::Validation(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use std::time::Duration;

    #[test]
    fn test_job_error_display_and_kind() {
        let err = JobError::from(LlmError::Timeout(Duration::from_secs(120)));
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.to_string(), "timeout: Generation timed out after 120s");

        let err = JobError::from(LlmError::Rejected {
            status: 429,
            message: "slow down".to_string(),
        });
        assert_eq!(err.kind, ErrorKind::RequestRejected);

        let err = JobError::from(LlmError::StreamFailed("server_error".to_string()));
        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);

        let err = JobError::from(LlmError::Refused("not allowed".to_string()));
        assert_eq!(err.kind, ErrorKind::RequestRejected);

        let err = JobError::from(CodeError::Unparsable("soon".to_string()));
        assert_eq!(err.kind, ErrorKind::InvalidDate);
        assert!(err.to_string().starts_with("invalid_date: "));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(ErrorKind::UpstreamUnavailable).unwrap(),
            json!("upstream_unavailable")
        );
    }

    #[tokio::test]
    async fn test_validation_maps_to_bad_request() {
        let response = AppError::Validation("name must not be blank".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(value["error"]["message"], "name must not be blank");
    }
}
