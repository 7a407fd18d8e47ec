//! crates/learning_assistant_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like PDF parsers or LLM APIs.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::DraftQuestion;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., network, parsing).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Extracts plain text from raw document bytes.
    /// An empty string signals that the document has no readable text.
    async fn extract_text(&self, raw_document: &[u8]) -> PortResult<String>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContentModel: Send + Sync {
    /// Produces a spoken-style summary of the given text.
    async fn summarize(&self, text: &str) -> PortResult<String>;

    /// Produces up to `count` single-choice questions about the given text.
    /// The output is unvalidated; the engine checks its shape.
    async fn generate_questions(&self, text: &str, count: usize)
        -> PortResult<Vec<DraftQuestion>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Generates audio data from a string of text.
    async fn synthesize(&self, text: &str) -> PortResult<Vec<u8>>;
}
