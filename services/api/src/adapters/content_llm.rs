//! services/api/src/adapters/content_llm.rs
//!
//! This module contains the adapter for the summarization and quiz-writing LLM.
//! It implements the `ContentModel` port from the `core` crate.

const SUMMARY_INSTRUCTIONS: &str = r#"You are a patient study companion who explains documents out loud.

Create a summary of the document you are given.
- It will be read aloud, so make it clear, well-structured, and easy to follow when spoken.
- Focus on the key concepts, main ideas, and important details.
- Keep it concise but informative, around 3-5 short paragraphs.
- Do not use markdown, bullet points, headings, or tables."#;

const QUIZ_TEMPLATE: &str = r#"Based on the following document, create {count} multiple choice questions.
Each question must have exactly 4 options (A, B, C, D) with only one correct answer.
Respond with ONLY a JSON array using this structure:
[
    {
        "question": "Question text here?",
        "options": ["A. Option 1", "B. Option 2", "C. Option 3", "D. Option 4"],
        "correct_answer": "A",
        "explanation": "Brief explanation of why this is correct"
    }
]

Make sure the questions test understanding of key concepts.

Document text:
{document}"#;

const SUMMARY_INPUT_CHARS: usize = 8000;
const QUIZ_INPUT_CHARS: usize = 6000;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use learning_assistant_core::{ContentModel, DraftQuestion, PortError, PortResult};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Matches label prefixes like `A. `, `b) `, `Option C: `.
static LABEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:option\s+)?[a-d]\s*[.):\-]\s*").expect("label prefix regex is valid")
});

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ContentModel` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiContentAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

/// One question as the model writes it.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(default)]
    question: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    correct_answer: String,
    #[serde(default)]
    explanation: String,
}

impl From<RawQuestion> for DraftQuestion {
    fn from(raw: RawQuestion) -> Self {
        DraftQuestion {
            question: raw.question,
            options: raw.options.iter().map(|o| strip_label(o)).collect(),
            correct_answer: raw.correct_answer,
            explanation: raw.explanation,
        }
    }
}

impl OpenAiContentAdapter {
    /// Creates a new `OpenAiContentAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    /// Sends one system + user exchange and returns the first choice's text.
    async fn complete(&self, system: &str, user: String) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Content LLM response contained no text content.".to_string())
            })
    }
}

//=========================================================================================
// `ContentModel` Trait Implementation
//=========================================================================================

#[async_trait]
impl ContentModel for OpenAiContentAdapter {
    async fn summarize(&self, text: &str) -> PortResult<String> {
        let document = truncate_chars(text, SUMMARY_INPUT_CHARS);
        let summary = self
            .complete(
                SUMMARY_INSTRUCTIONS,
                format!("Document text:\n{}", document),
            )
            .await?;
        debug!(summary_chars = summary.len(), "Summary received");
        Ok(summary.trim().to_string())
    }

    async fn generate_questions(&self, text: &str, count: usize) -> PortResult<Vec<DraftQuestion>> {
        let prompt = QUIZ_TEMPLATE
            .replace("{count}", &count.to_string())
            .replace("{document}", truncate_chars(text, QUIZ_INPUT_CHARS));

        let raw = self
            .complete("You write quiz questions and reply with JSON only.", prompt)
            .await?;
        parse_questions(&raw)
    }
}

//=========================================================================================
// Response Parsing Helpers
//=========================================================================================

/// Cuts the JSON array out of a reply that may wrap it in prose or code fences.
fn extract_json_array(reply: &str) -> Option<&str> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    (start < end).then(|| &reply[start..=end])
}

fn parse_questions(reply: &str) -> PortResult<Vec<DraftQuestion>> {
    let json = extract_json_array(reply).ok_or_else(|| {
        warn!("Quiz reply contained no JSON array");
        PortError::Unexpected("quiz reply contained no JSON array".to_string())
    })?;

    let raw: Vec<RawQuestion> = serde_json::from_str(json)
        .map_err(|e| PortError::Unexpected(format!("quiz reply was not valid JSON: {}", e)))?;
    Ok(raw.into_iter().map(DraftQuestion::from).collect())
}

fn strip_label(option: &str) -> String {
    LABEL_PREFIX.replace(option, "").trim().to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
