//! Error types for the API layer.
//!
//! `ApiError` serializes as JSON with the appropriate HTTP status code;
//! internal details are logged, never sent to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use parlance_core::{LeaseError, ParlanceError, StoreError};

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request contains invalid input data
    InvalidInput,
    /// Requested entity does not exist
    EntityNotFound,
    /// Concurrent modification rejected
    Conflict,
    /// Downstream dependency unavailable
    Unavailable,
    /// Unexpected server-side failure
    InternalError,
}

impl ErrorCode {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::EntityNotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Structured API error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::EntityNotFound,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Conflict,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Unavailable,
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: message.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<ParlanceError> for ApiError {
    fn from(error: ParlanceError) -> Self {
        match &error {
            ParlanceError::Store(StoreError::NotFound { .. }) => {
                Self::not_found(error.to_string())
            }
            ParlanceError::Store(StoreError::Conflict { .. }) => {
                Self::conflict(error.to_string())
            }
            ParlanceError::Lease(LeaseError::Busy { .. }) => Self::conflict(error.to_string()),
            ParlanceError::Validation(_) => Self::invalid_input(error.to_string()),
            ParlanceError::Config(_) => Self::internal_error(error.to_string()),
            _ if error.is_transient() => Self::unavailable(error.to_string()),
            _ => Self::internal_error(error.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        ParlanceError::from(error).into()
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a ApiError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        if status.is_server_error() {
            tracing::error!(code = ?self.code, message = %self.message, "request failed");
        }
        (status, Json(ErrorBody { error: &self })).into_response()
    }
}

/// Result alias for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use parlance_core::{CallId, EntityIdType};

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::InvalidInput.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::EntityNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Conflict.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_store_errors_map() {
        let not_found: ApiError = StoreError::NotFound { id: CallId::nil() }.into();
        assert_eq!(not_found.code, ErrorCode::EntityNotFound);

        let conflict: ApiError = StoreError::Conflict {
            id: CallId::nil(),
            expected: 1,
            stored: 2,
        }
        .into();
        assert_eq!(conflict.code, ErrorCode::Conflict);

        let transient: ApiError = StoreError::Transient {
            reason: "socket".to_string(),
        }
        .into();
        assert_eq!(transient.code, ErrorCode::Unavailable);
    }
}
