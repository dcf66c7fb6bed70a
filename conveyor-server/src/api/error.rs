//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::ServiceError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            ServiceError::InvalidOperation(msg) | ServiceError::Validation(msg) => {
                ApiError::BadRequest(msg)
            }
            ServiceError::Conflict(msg) => ApiError::Conflict(msg),
            ServiceError::Storage(err) => ApiError::InternalError(format!("{:?}", err)),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryError;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ServiceError::NotFound("Task 1".to_string()), StatusCode::NOT_FOUND),
            (
                ServiceError::InvalidOperation("cannot move past chain boundary".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (ServiceError::Validation("bad".to_string()), StatusCode::BAD_REQUEST),
            (ServiceError::Conflict("dup".to_string()), StatusCode::CONFLICT),
            (
                ServiceError::Storage(RepositoryError::storage("disk on fire")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
