//! services/api/src/adapters/extractor.rs
//!
//! This module contains the plain-text document extractor.
//! It implements the `DocumentExtractor` port from the `core` crate.

use async_trait::async_trait;
use learning_assistant_core::{DocumentExtractor, PortResult};
use std::borrow::Cow;
use tracing::debug;

/// Reads uploaded documents as UTF-8 text.
#[derive(Clone, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentExtractor for PlainTextExtractor {
    /// Decodes the document as UTF-8 and normalizes its line endings.
    ///
    /// Invalid byte sequences are dropped rather than rejected. Returns an
    /// empty string when nothing readable remains, which the engine treats as
    /// "no readable text".
    async fn extract_text(&self, raw_document: &[u8]) -> PortResult<String> {
        let text = String::from_utf8_lossy(raw_document);
        if matches!(text, Cow::Owned(_)) {
            debug!("Uploaded document contained invalid UTF-8; dropping those bytes");
        }

        let text = text
            .trim_start_matches('\u{feff}')
            .replace("\r\n", "\n")
            .replace(['\0', char::REPLACEMENT_CHARACTER], "");
        Ok(text.trim().to_string())
    }
}
