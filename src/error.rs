//! Caller-facing failures and how they render over HTTP.
//!
//! Every body is `{ "error": true, "message": ... }`. Expected business-rule
//! failures carry a fixed message; unexpected ones are logged here and the
//! caller only sees which operation failed.

use std::fmt::Display;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad Request: Validation")]
    Validation,
    #[error("{0}")]
    Conflict(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("Bad Request: Generating Task Failed, Bad Prompt")]
    GenerationFailed,
    #[error("Server Error: {0}")]
    Server(&'static str),
}

impl ApiError {
    /// Logs `cause` and returns an opaque 500 naming only `operation`.
    pub fn server(operation: &'static str, cause: impl Display) -> Self {
        error!(operation, error = %cause, "request failed");
        ApiError::Server(operation)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation | ApiError::Conflict(_) | ApiError::GenerationFailed => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Envelope for responses without a payload.
#[derive(Serialize, Debug, ToSchema)]
pub struct MessageResponse {
    pub error: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: &str) -> Self {
        Self {
            error: false,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = MessageResponse {
            error: true,
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(ApiError::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Conflict("dup").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::GenerationFailed.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("gone").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Unauthorized("no").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Server("Create Goal").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn server_errors_do_not_leak_the_cause() {
        let err = ApiError::server("Create Goal", "disk on fire at /var/lib/secret");
        assert_eq!(err.to_string(), "Server Error: Create Goal");
    }
}
