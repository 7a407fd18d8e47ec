//! crates/learning_assistant_core/src/fallback.rs
//!
//! Deterministic, locally computed content used when the `ContentModel`
//! fails or returns something unusable.

use crate::domain::{OptionLabel, Question};

/// Documents shorter than this (after trimming) are not worth sending to the model.
pub const MIN_SUMMARIZABLE_CHARS: usize = 10;

const FALLBACK_SENTENCES: usize = 5;
const FALLBACK_SUMMARY_MAX_CHARS: usize = 500;

pub const TOO_SHORT_SUMMARY: &str =
    "The document appears to be empty or contains very little text.";

/// Returns the fixed summary for near-empty documents, or `None` if the text is long enough to summarize.
pub fn short_document_summary(text: &str) -> Option<String> {
    (text.trim().chars().count() < MIN_SUMMARIZABLE_CHARS).then(|| TOO_SHORT_SUMMARY.to_string())
}

/// Builds a basic summary from the opening sentences and a word count.
pub fn fallback_summary(text: &str) -> String {
    let opening = text
        .split('.')
        .take(FALLBACK_SENTENCES)
        .collect::<Vec<_>>()
        .join(". ");
    let opening = opening.trim();

    let basic = if opening.chars().count() > FALLBACK_SUMMARY_MAX_CHARS {
        let cut: String = opening.chars().take(FALLBACK_SUMMARY_MAX_CHARS).collect();
        format!("{}...", cut)
    } else {
        opening.to_string()
    };

    format!(
        "Here's a basic summary of the document: {}. The document contains approximately {} words covering various topics and concepts.",
        basic,
        text.split_whitespace().count()
    )
}

/// The single question served when question generation yields nothing usable.
pub fn fallback_questions() -> Vec<Question> {
    vec![Question {
        text: "Based on the document summary, what was the main topic discussed?".to_string(),
        options: [
            "Science".to_string(),
            "History".to_string(),
            "Mathematics".to_string(),
            "Literature".to_string(),
        ],
        correct_option: OptionLabel::A,
        explanation: "This is a general question about the document content.".to_string(),
    }]
}
