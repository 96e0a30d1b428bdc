//! Centralized error types for Milo core.
//!
//! One variant per failure family: each carries enough detail to be both
//! logged and shown to an operator, and the whole enum implements
//! `IntoResponse` so REST handlers can simply `?`-propagate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide a machine-readable error code.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the Milo server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum MiloError {
    /// Missing or invalid settings; falls back to defaults at runtime, fatal at init.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A service-unit operation failed or timed out.
    #[error("Service control error: {0}")]
    ServiceControl(String),

    /// A routing step failed; revert was attempted.
    #[error("Routing error: {0}")]
    Routing(String),

    /// A source transition timed out.
    #[error("Transition error: {0}")]
    Transition(String),

    /// A plugin-specific failure (daemon 4xx, stream refused, etc).
    #[error("Plugin error: {0}")]
    PluginInternal(String),

    /// A filesystem write failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The caller referenced a source, target, or key that doesn't exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller's request was malformed or semantically invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A `request_source` call was rejected (dedup against an in-flight request).
    #[error("Rejected: {0}")]
    Rejected(String),
}

impl MiloError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::ServiceControl(_) => "service_control_error",
            Self::Routing(_) => "routing_error",
            Self::Transition(_) => "transition_error",
            Self::PluginInternal(_) => "plugin_error",
            Self::Persistence(_) => "persistence_error",
            Self::NotFound(_) => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Rejected(_) => "rejected",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    ///
    /// Caller-induced failures map to 4xx; everything else is an internal 5xx.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Rejected(_) => StatusCode::CONFLICT,
            Self::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Routing(_) | Self::Transition(_) | Self::ServiceControl(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::PluginInternal(_) => StatusCode::BAD_GATEWAY,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for MiloError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// Convenient Result alias for application-wide operations.
pub type MiloResult<T> = Result<T, MiloError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = MiloError::NotFound("source bluetooth".into());
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn rejected_maps_to_409() {
        let err = MiloError::Rejected("busy".into());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn config_error_is_service_unavailable() {
        let err = MiloError::Config("missing settings directory".into());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
