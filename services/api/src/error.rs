//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use learning_assistant_core::EngineError;
use tracing::error;

use crate::config::ConfigError;
use crate::web::protocol::ErrorBody;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from the session engine.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// The request itself was unusable (missing upload, empty text, ...).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::InvalidState { .. } | EngineError::Conflict { .. } => {
                    StatusCode::CONFLICT
                }
                EngineError::ExtractionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::ExternalService(_) | EngineError::MalformedGeneration(_) => {
                    StatusCode::BAD_GATEWAY
                }
                EngineError::ExternalServiceTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Config(_) | ApiError::Io(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
