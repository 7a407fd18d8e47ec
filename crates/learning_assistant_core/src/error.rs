//! crates/learning_assistant_core/src/error.rs
//!
//! The error taxonomy surfaced by the session engine.

use std::time::Duration;
use uuid::Uuid;

use crate::domain::SessionPhase;

/// Every way an engine operation can fail.
///
/// `ExternalService` and `MalformedGeneration` are usually recovered by a
/// fallback and only reach the caller inside a `ContentSource::Fallback`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Session not found: {0}")]
    NotFound(Uuid),

    #[error("Operation '{operation}' is not allowed while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionPhase,
    },

    #[error("Session changed while '{operation}' was in flight")]
    Conflict { operation: &'static str },

    #[error("Could not extract readable text from the document: {0}")]
    ExtractionFailed(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Generated content was malformed: {0}")]
    MalformedGeneration(String),

    #[error("External call '{operation}' timed out after {after:?}")]
    ExternalServiceTimeout {
        operation: &'static str,
        after: Duration,
    },
}

/// A convenience type alias for `Result<T, EngineError>`.
pub type EngineResult<T> = Result<T, EngineError>;
