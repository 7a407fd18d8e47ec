//! services/api/src/web/protocol.rs
//!
//! Defines the JSON request and response payloads exchanged between the
//! browser client and the API server.

use chrono::{DateTime, Utc};
use learning_assistant_core::{
    AnswerOutcome, ContentSource, IngestOutcome, Question, QuizPrompt, QuizReport, QuizStarted,
    ReportOutcome, SessionSnapshot, SummaryOutcome,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

//=========================================================================================
// Requests
//=========================================================================================

#[derive(Deserialize, Debug, ToSchema)]
pub struct AnswerRequest {
    /// `A`-`D` in any case, or the spoken form such as `option b`.
    pub answer: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct SpeechRequest {
    pub text: String,
}

#[derive(Deserialize, Debug, IntoParams)]
pub struct StartQuizQuery {
    /// Number of questions to generate (clamped to 1-20).
    pub count: Option<usize>,
}

//=========================================================================================
// Responses
//=========================================================================================

#[derive(Serialize, Debug, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct SessionView {
    pub session_id: Uuid,
    pub state: String,
    pub has_document: bool,
    pub summary: Option<String>,
    pub question_index: usize,
    pub total_questions: usize,
    pub score: usize,
}

impl From<SessionSnapshot> for SessionView {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.id,
            state: snapshot.phase.to_string(),
            has_document: snapshot.has_document,
            summary: snapshot.summary,
            question_index: snapshot.question_index,
            total_questions: snapshot.total_questions,
            score: snapshot.score,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct SummaryResponse {
    pub session_id: Uuid,
    pub state: String,
    pub summary: String,
    pub message: String,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
}

impl From<SummaryOutcome> for SummaryResponse {
    fn from(outcome: SummaryOutcome) -> Self {
        let (fallback_used, fallback_reason) = describe_source(&outcome.source);
        Self {
            session_id: outcome.session_id,
            state: outcome.phase.to_string(),
            summary: outcome.summary,
            message: "Do you understand the summary?".to_string(),
            fallback_used,
            fallback_reason,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct IngestResponse {
    pub session_id: Uuid,
    pub state: String,
    pub message: String,
    pub document_chars: usize,
    pub summary: Option<SummaryResponse>,
}

impl From<IngestOutcome> for IngestResponse {
    fn from(outcome: IngestOutcome) -> Self {
        let message = if outcome.summary.is_some() {
            "Document processed successfully! Here is the summary:"
        } else {
            "Document processed successfully!"
        };
        Self {
            session_id: outcome.session_id,
            state: outcome.phase.to_string(),
            message: message.to_string(),
            document_chars: outcome.document_chars,
            summary: outcome.summary.map(SummaryResponse::from),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct OptionView {
    pub label: String,
    pub text: String,
}

/// A question as shown to the learner. The correct answer is never included.
#[derive(Serialize, Debug, ToSchema)]
pub struct QuestionView {
    pub question: String,
    pub options: Vec<OptionView>,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            question: question.text.clone(),
            options: question
                .labeled_options()
                .map(|(label, text)| OptionView {
                    label: label.to_string(),
                    text: text.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct QuizResponse {
    pub session_id: Uuid,
    pub state: String,
    pub question: QuestionView,
    pub question_number: usize,
    pub total_questions: usize,
    pub score: usize,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
}

impl From<QuizPrompt> for QuizResponse {
    fn from(prompt: QuizPrompt) -> Self {
        Self {
            session_id: prompt.session_id,
            state: prompt.phase.to_string(),
            question: QuestionView::from(&prompt.question),
            question_number: prompt.question_number,
            total_questions: prompt.total_questions,
            score: prompt.score,
            fallback_used: false,
            fallback_reason: None,
        }
    }
}

impl From<QuizStarted> for QuizResponse {
    fn from(started: QuizStarted) -> Self {
        let (fallback_used, fallback_reason) = describe_source(&started.source);
        Self {
            fallback_used,
            fallback_reason,
            ..QuizResponse::from(started.prompt)
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ReportView {
    pub score: usize,
    pub total_questions: usize,
    pub percentage: f64,
    pub tier: String,
    pub message: String,
}

impl From<QuizReport> for ReportView {
    fn from(report: QuizReport) -> Self {
        Self {
            score: report.score,
            total_questions: report.total_questions,
            percentage: report.percentage,
            tier: report.tier.as_str().to_string(),
            message: report.message,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct AnswerResponse {
    pub session_id: Uuid,
    pub state: String,
    pub correct: bool,
    pub correct_answer: String,
    pub feedback: String,
    pub current_score: usize,
    pub answered: usize,
    pub total_questions: usize,
    pub quiz_complete: bool,
    /// One-based number of `next_question`, when there is one.
    pub question_number: Option<usize>,
    pub next_question: Option<QuestionView>,
    pub report: Option<ReportView>,
}

impl From<AnswerOutcome> for AnswerResponse {
    fn from(outcome: AnswerOutcome) -> Self {
        Self {
            session_id: outcome.session_id,
            state: outcome.phase.to_string(),
            correct: outcome.correct,
            correct_answer: outcome.correct_option.to_string(),
            feedback: outcome.feedback,
            current_score: outcome.score,
            answered: outcome.answered,
            total_questions: outcome.total_questions,
            quiz_complete: outcome.report.is_some(),
            question_number: outcome.next_question.as_ref().map(|_| outcome.answered + 1),
            next_question: outcome.next_question.as_ref().map(QuestionView::from),
            report: outcome.report.map(ReportView::from),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ReportResponse {
    pub session_id: Uuid,
    pub state: String,
    pub report: ReportView,
}

impl From<ReportOutcome> for ReportResponse {
    fn from(outcome: ReportOutcome) -> Self {
        Self {
            session_id: outcome.session_id,
            state: outcome.phase.to_string(),
            report: ReportView::from(outcome.report),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub active_sessions: usize,
    pub max_upload_bytes: usize,
    /// `None` when idle sessions are never evicted.
    pub session_idle_ttl_secs: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct SessionListResponse {
    pub total_sessions: usize,
    pub sessions: Vec<SessionView>,
}

fn describe_source(source: &ContentSource) -> (bool, Option<String>) {
    match source {
        ContentSource::Fallback(reason) => (true, Some(reason.to_string())),
        ContentSource::Model | ContentSource::TooShort => (false, None),
    }
}
