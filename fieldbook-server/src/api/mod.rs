//! HTTP API surface
//!
//! Routes, handlers, SSE streaming, and the bearer-token layer guarding the
//! producing-process endpoints.

pub mod auth;
pub mod handlers;
pub mod server;
pub mod sse;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fieldbook_common::api::ErrorResponse;
use fieldbook_common::Error;
use tracing::error;

/// Wrapper mapping the common error taxonomy onto HTTP responses
pub struct ApiError(pub Error);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(ErrorResponse::new(code, self.0.to_string()))).into_response()
    }
}
