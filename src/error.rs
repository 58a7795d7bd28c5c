use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Stable error codes sent to clients over every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    ConferenceNotActive,
    ConferenceEnded,
    QuestionNotFound,
    QuestionAlreadyLive,
    QuestionAlreadyClosed,
    QuestionNotLive,
    QuestionExpired,
    InvalidOption,
    AlreadyAnswered,
    OperationInProgress,
    InvalidInput,
    InternalError,
}

impl ErrorCode {
    /// Short lowercase slug carried by vote rejections.
    pub fn reason(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::ConferenceNotActive => "conference_not_active",
            ErrorCode::ConferenceEnded => "conference_ended",
            ErrorCode::QuestionNotFound => "question_not_found",
            ErrorCode::QuestionAlreadyLive => "already_live",
            ErrorCode::QuestionAlreadyClosed => "already_closed",
            ErrorCode::QuestionNotLive => "not_live",
            ErrorCode::QuestionExpired => "expired",
            ErrorCode::InvalidOption => "invalid_option",
            ErrorCode::AlreadyAnswered => "duplicate",
            ErrorCode::OperationInProgress => "in_progress",
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::InternalError => "internal",
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Caller does not hold the role the operation requires.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Conference is unknown or not accepting activity.
    #[error("conference `{0}` is not active")]
    ConferenceNotActive(String),
    /// Conference has been ended by its organiser.
    #[error("conference `{0}` has ended")]
    ConferenceEnded(String),
    /// Question definition is missing or belongs to another conference.
    #[error("question `{0}` not found")]
    QuestionNotFound(String),
    /// Another question is live in the conference.
    #[error("question `{existing}` is already live")]
    QuestionAlreadyLive { existing: String },
    /// Question already has a final result.
    #[error("question `{0}` is already closed")]
    QuestionAlreadyClosed(String),
    /// Targeted question is not the live one.
    #[error("question `{0}` is not live")]
    QuestionNotLive(String),
    /// Voting window of the question has elapsed.
    #[error("question `{0}` has expired")]
    QuestionExpired(String),
    /// Option key is not declared by the question.
    #[error("option `{0}` is not valid for this question")]
    InvalidOption(String),
    /// Participant already has a counted vote.
    #[error("participant already answered this question")]
    AlreadyAnswered,
    /// A concurrent operation holds the conference lock.
    #[error("another operation is in progress")]
    OperationInProgress,
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
    /// Unexpected failure that left no partial state behind.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Wire code reported to the originating client.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Unauthorized(_) => ErrorCode::Unauthorized,
            ServiceError::ConferenceNotActive(_) => ErrorCode::ConferenceNotActive,
            ServiceError::ConferenceEnded(_) => ErrorCode::ConferenceEnded,
            ServiceError::QuestionNotFound(_) => ErrorCode::QuestionNotFound,
            ServiceError::QuestionAlreadyLive { .. } => ErrorCode::QuestionAlreadyLive,
            ServiceError::QuestionAlreadyClosed(_) => ErrorCode::QuestionAlreadyClosed,
            ServiceError::QuestionNotLive(_) => ErrorCode::QuestionNotLive,
            ServiceError::QuestionExpired(_) => ErrorCode::QuestionExpired,
            ServiceError::InvalidOption(_) => ErrorCode::InvalidOption,
            ServiceError::AlreadyAnswered => ErrorCode::AlreadyAnswered,
            ServiceError::OperationInProgress => ErrorCode::OperationInProgress,
            ServiceError::InvalidInput(_) => ErrorCode::InvalidInput,
            ServiceError::Unavailable(_)
            | ServiceError::Degraded
            | ServiceError::Timeout
            | ServiceError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Unauthorized(_) => AppError::Unauthorized(message),
            ServiceError::QuestionNotFound(_) => AppError::NotFound(message),
            ServiceError::InvalidOption(_) | ServiceError::InvalidInput(_) => {
                AppError::BadRequest(message)
            }
            ServiceError::ConferenceNotActive(_)
            | ServiceError::ConferenceEnded(_)
            | ServiceError::QuestionAlreadyLive { .. }
            | ServiceError::QuestionAlreadyClosed(_)
            | ServiceError::QuestionNotLive(_)
            | ServiceError::QuestionExpired(_)
            | ServiceError::AlreadyAnswered
            | ServiceError::OperationInProgress => AppError::Conflict(message),
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
            ServiceError::Internal(_) => AppError::Internal(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_in_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::QuestionAlreadyLive).unwrap();
        assert_eq!(json, "\"QUESTION_ALREADY_LIVE\"");
    }

    #[test]
    fn duplicate_vote_uses_duplicate_reason() {
        assert_eq!(ServiceError::AlreadyAnswered.code().reason(), "duplicate");
    }

    #[test]
    fn infrastructure_failures_surface_as_internal() {
        assert_eq!(ServiceError::Degraded.code(), ErrorCode::InternalError);
        assert_eq!(
            ServiceError::from(StorageError::corrupt("k", "bad")).code(),
            ErrorCode::InternalError
        );
    }

    #[test]
    fn conflicts_map_to_409() {
        let response = AppError::from(ServiceError::OperationInProgress).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
