//! crates/learning_assistant_core/src/engine.rs
//!
//! The per-session state machine: ingest, summarize, quiz, answer and report.
//!
//! External calls (extraction, summarization, question generation, speech)
//! never run while the session lock is held. An operation reads what it needs
//! under the lock and notes the session's revision. It then releases the lock
//! and makes the call. Finally it re-locks and applies the result only if the
//! revision is unchanged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    DraftQuestion, OptionLabel, Question, QuizReport, Session, SessionPhase, SessionSnapshot,
};
use crate::error::{EngineError, EngineResult};
use crate::fallback::{fallback_questions, fallback_summary, short_document_summary};
use crate::ports::{ContentModel, DocumentExtractor, PortResult, Speaker};
use crate::store::{SessionHandle, SessionStore};

/// Upper bound on questions per quiz attempt.
pub const MAX_QUESTIONS: usize = 20;

//=========================================================================================
// Configuration
//=========================================================================================

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Summarize immediately after a successful ingest.
    pub auto_summarize: bool,
    /// Bound applied to every collaborator call.
    pub external_timeout: Duration,
    /// Question count used when a quiz is started without an explicit count.
    pub default_question_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_summarize: true,
            external_timeout: Duration::from_secs(30),
            default_question_count: 5,
        }
    }
}

//=========================================================================================
// Transition Table
//=========================================================================================

/// The operations whose legality depends on the session's phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Ingest,
    Summarize,
    StartQuiz,
    SubmitAnswer,
    Report,
    RestartQuiz,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Ingest => "ingest",
            Operation::Summarize => "summarize",
            Operation::StartQuiz => "start_quiz",
            Operation::SubmitAnswer => "submit_answer",
            Operation::Report => "report",
            Operation::RestartQuiz => "restart_quiz",
        }
    }

    pub fn permitted_in(&self, phase: SessionPhase) -> bool {
        use SessionPhase::*;
        match self {
            Operation::Ingest => matches!(phase, AwaitingDocument),
            Operation::Summarize => matches!(phase, DocumentReady | SummaryGenerated),
            Operation::StartQuiz => matches!(phase, SummaryGenerated | QuizActive | QuizComplete),
            Operation::SubmitAnswer => matches!(phase, QuizActive),
            Operation::Report | Operation::RestartQuiz => matches!(phase, QuizComplete),
        }
    }

    fn check(self, session: &Session) -> EngineResult<()> {
        if self.permitted_in(session.phase) {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                operation: self.name(),
                state: session.phase,
            })
        }
    }

    /// Verifies nothing touched the session while this operation's external call ran.
    fn check_unchanged(self, session: &Session, revision: u64) -> EngineResult<()> {
        if session.revision == revision {
            Ok(())
        } else {
            Err(EngineError::Conflict {
                operation: self.name(),
            })
        }
    }
}

//=========================================================================================
// Operation Payloads
//=========================================================================================

/// Where a piece of generated content came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentSource {
    /// Produced by the `ContentModel`.
    Model,
    /// The document was too short to be worth summarizing.
    TooShort,
    /// The model failed or returned unusable output; a local fallback was used.
    Fallback(EngineError),
}

impl ContentSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ContentSource::Fallback(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub summary: String,
    pub source: ContentSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub document_chars: usize,
    /// Present when the engine summarized as part of the ingest.
    pub summary: Option<SummaryOutcome>,
}

/// The question a quiz is currently waiting on.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizPrompt {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub question: Question,
    /// One-based position of `question` in the set.
    pub question_number: usize,
    pub total_questions: usize,
    pub score: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuizStarted {
    pub prompt: QuizPrompt,
    pub source: ContentSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    /// The normalized label, or `None` if the input did not name an option.
    pub submitted: Option<OptionLabel>,
    pub correct: bool,
    pub correct_option: OptionLabel,
    pub feedback: String,
    pub score: usize,
    pub answered: usize,
    pub total_questions: usize,
    pub next_question: Option<Question>,
    /// Present once the last question has been answered.
    pub report: Option<QuizReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutcome {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub report: QuizReport,
}

//=========================================================================================
// SessionEngine
//=========================================================================================

/// Drives sessions through their lifecycle. The only writer of session state.
pub struct SessionEngine {
    store: Arc<SessionStore>,
    extractor: Arc<dyn DocumentExtractor>,
    content: Arc<dyn ContentModel>,
    speaker: Arc<dyn Speaker>,
    config: EngineConfig,
}

impl SessionEngine {
    pub fn new(
        store: Arc<SessionStore>,
        extractor: Arc<dyn DocumentExtractor>,
        content: Arc<dyn ContentModel>,
        speaker: Arc<dyn Speaker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            content,
            speaker,
            config,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    // --- Session lifecycle ---

    /// Creates an empty session awaiting a document.
    pub async fn new_session(&self) -> SessionSnapshot {
        let id = self.store.create();
        // A freshly created session cannot be missing.
        match self.store.get(id) {
            Ok(handle) => handle.lock().await.snapshot(),
            Err(_) => Session::new(id).snapshot(),
        }
    }

    /// Creates a session and ingests `raw_document` into it.
    ///
    /// The session is only kept if the ingest succeeds, so a rejected upload
    /// leaves nothing behind in the store.
    pub async fn open_with_document(&self, raw_document: &[u8]) -> EngineResult<IngestOutcome> {
        let id = self.store.create();
        let outcome = self.ingest(id, raw_document).await;
        if outcome.is_err() {
            self.store.remove(id);
            debug!(session_id = %id, "Discarded session after failed ingest");
        }
        outcome
    }

    /// Discards the session's document, summary and questions.
    pub async fn new_document(&self, id: Uuid) -> EngineResult<SessionSnapshot> {
        let handle = self.store.get(id)?;
        let mut session = handle.lock().await;
        session.reset();
        info!(session_id = %id, "Session reset for a new document");
        Ok(session.snapshot())
    }

    pub async fn snapshot(&self, id: Uuid) -> EngineResult<SessionSnapshot> {
        let handle = self.store.get(id)?;
        let session = handle.lock().await;
        Ok(session.snapshot())
    }

    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.store.snapshots().await
    }

    // --- Document and summary ---

    /// Extracts the document's text and, when configured, summarizes it.
    ///
    /// Extraction failures are surfaced and leave the session untouched in
    /// `AwaitingDocument`. Summarization failures fall back to a local summary.
    /// If the session changes while the summary is generated, the ingest still
    /// succeeds and the outcome carries no summary.
    pub async fn ingest(&self, id: Uuid, raw_document: &[u8]) -> EngineResult<IngestOutcome> {
        let op = Operation::Ingest;
        let handle = self.store.get(id)?;
        let revision = {
            let session = handle.lock().await;
            op.check(&session)?;
            session.revision
        };

        let text = match self
            .bounded("extract_text", self.extractor.extract_text(raw_document))
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(EngineError::ExternalService(reason)) => {
                warn!(session_id = %id, %reason, "Document extraction failed");
                return Err(EngineError::ExtractionFailed(reason));
            }
            Err(e) => return Err(e),
        };
        if text.is_empty() {
            info!(session_id = %id, "Document contained no readable text");
            return Err(EngineError::ExtractionFailed(
                "no readable text found in the document".to_string(),
            ));
        }

        let document_chars = text.chars().count();
        let revision = {
            let mut session = handle.lock().await;
            op.check_unchanged(&session, revision)?;
            session.document_text = text.clone();
            session.phase = SessionPhase::DocumentReady;
            session.bump();
            info!(session_id = %id, document_chars, "Document ingested");
            session.revision
        };

        if !self.config.auto_summarize {
            return Ok(IngestOutcome {
                session_id: id,
                phase: SessionPhase::DocumentReady,
                document_chars,
                summary: None,
            });
        }

        // The document is committed at this point. A summary that loses the
        // race to another operation is dropped without undoing the ingest.
        let summary = match self.apply_summary(&handle, op, &text, revision).await {
            Ok(summary) => Some(summary),
            Err(EngineError::Conflict { .. }) => {
                info!(session_id = %id, "Session changed before the summary landed");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(IngestOutcome {
            session_id: id,
            phase: summary
                .as_ref()
                .map_or(SessionPhase::DocumentReady, |summary| summary.phase),
            document_chars,
            summary,
        })
    }

    /// Generates (or regenerates) the session's summary. Never fails on model errors.
    pub async fn summarize(&self, id: Uuid) -> EngineResult<SummaryOutcome> {
        let op = Operation::Summarize;
        let handle = self.store.get(id)?;
        let (text, revision) = {
            let session = handle.lock().await;
            op.check(&session)?;
            (session.document_text.clone(), session.revision)
        };
        self.apply_summary(&handle, op, &text, revision).await
    }

    async fn apply_summary(
        &self,
        handle: &SessionHandle,
        op: Operation,
        text: &str,
        revision: u64,
    ) -> EngineResult<SummaryOutcome> {
        let (summary, source) = self.produce_summary(handle.id(), text).await;

        let mut session = handle.lock().await;
        op.check_unchanged(&session, revision)?;
        session.summary = summary.clone();
        session.phase = SessionPhase::SummaryGenerated;
        session.bump();
        info!(
            session_id = %session.id,
            fallback = source.is_fallback(),
            "Summary generated"
        );

        Ok(SummaryOutcome {
            session_id: session.id,
            phase: session.phase,
            summary,
            source,
        })
    }

    async fn produce_summary(&self, id: Uuid, text: &str) -> (String, ContentSource) {
        if let Some(summary) = short_document_summary(text) {
            return (summary, ContentSource::TooShort);
        }

        let failure = match self
            .bounded("summarize", self.content.summarize(text))
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => {
                return (summary.trim().to_string(), ContentSource::Model);
            }
            Ok(_) => EngineError::MalformedGeneration("model returned an empty summary".to_string()),
            Err(e) => e,
        };

        warn!(session_id = %id, error = %failure, "Falling back to local summary");
        (fallback_summary(text), ContentSource::Fallback(failure))
    }

    // --- Quiz ---

    /// Generates a fresh question set and starts a quiz attempt over it.
    ///
    /// `count` defaults to the configured count and is clamped to `1..=MAX_QUESTIONS`.
    pub async fn start_quiz(&self, id: Uuid, count: Option<usize>) -> EngineResult<QuizStarted> {
        let op = Operation::StartQuiz;
        let count = count
            .unwrap_or(self.config.default_question_count)
            .clamp(1, MAX_QUESTIONS);
        let handle = self.store.get(id)?;
        let (text, revision) = {
            let session = handle.lock().await;
            op.check(&session)?;
            (session.document_text.clone(), session.revision)
        };

        let (questions, source) = self.produce_questions(id, &text, count).await;

        let mut session = handle.lock().await;
        op.check_unchanged(&session, revision)?;
        session.begin_attempt(Some(questions));
        info!(
            session_id = %id,
            total_questions = session.questions.len(),
            fallback = source.is_fallback(),
            "Quiz started"
        );

        let prompt = current_prompt(&session).ok_or(EngineError::InvalidState {
            operation: op.name(),
            state: session.phase,
        })?;
        Ok(QuizStarted { prompt, source })
    }

    async fn produce_questions(
        &self,
        id: Uuid,
        text: &str,
        count: usize,
    ) -> (Vec<Question>, ContentSource) {
        let failure = match self
            .bounded(
                "generate_questions",
                self.content.generate_questions(text, count),
            )
            .await
        {
            Ok(drafts) => match validate_drafts(id, drafts, count) {
                Ok(questions) => return (questions, ContentSource::Model),
                Err(e) => e,
            },
            Err(e) => e,
        };

        warn!(session_id = %id, error = %failure, "Falling back to fixed quiz question");
        (fallback_questions(), ContentSource::Fallback(failure))
    }

    /// Scores an answer to the current question and advances the cursor.
    ///
    /// Unrecognized labels are scored as incorrect, not rejected.
    pub async fn submit_answer(&self, id: Uuid, answer: &str) -> EngineResult<AnswerOutcome> {
        let op = Operation::SubmitAnswer;
        let handle = self.store.get(id)?;
        let mut session = handle.lock().await;
        op.check(&session)?;

        let question = session
            .current_question()
            .cloned()
            .ok_or(EngineError::InvalidState {
                operation: op.name(),
                state: session.phase,
            })?;

        let submitted = OptionLabel::parse_answer(answer);
        let correct = submitted == Some(question.correct_option);
        if correct {
            session.score += 1;
        }
        let feedback = if correct {
            format!("Correct! {}", question.explanation)
        } else {
            format!(
                "Incorrect. The right answer is {}. {}",
                question.correct_option, question.explanation
            )
        };

        session.question_index += 1;
        let total_questions = session.questions.len();
        let report = if session.question_index >= total_questions {
            session.phase = SessionPhase::QuizComplete;
            Some(QuizReport::new(session.score, total_questions))
        } else {
            None
        };
        session.bump();
        debug!(
            session_id = %id,
            correct,
            answered = session.question_index,
            score = session.score,
            "Answer scored"
        );
        if report.is_some() {
            info!(session_id = %id, score = session.score, total_questions, "Quiz complete");
        }

        Ok(AnswerOutcome {
            session_id: id,
            phase: session.phase,
            submitted,
            correct,
            correct_option: question.correct_option,
            feedback,
            score: session.score,
            answered: session.question_index,
            total_questions,
            next_question: session.current_question().cloned(),
            report,
        })
    }

    pub async fn report(&self, id: Uuid) -> EngineResult<ReportOutcome> {
        let handle = self.store.get(id)?;
        let session = handle.lock().await;
        Operation::Report.check(&session)?;
        Ok(ReportOutcome {
            session_id: id,
            phase: session.phase,
            report: QuizReport::new(session.score, session.questions.len()),
        })
    }

    /// Retakes the completed quiz with the same questions.
    pub async fn restart_quiz(&self, id: Uuid) -> EngineResult<QuizPrompt> {
        let op = Operation::RestartQuiz;
        let handle = self.store.get(id)?;
        let mut session = handle.lock().await;
        op.check(&session)?;
        if session.questions.is_empty() {
            return Err(EngineError::InvalidState {
                operation: op.name(),
                state: session.phase,
            });
        }

        session.begin_attempt(None);
        info!(session_id = %id, "Quiz restarted");
        current_prompt(&session).ok_or(EngineError::InvalidState {
            operation: op.name(),
            state: session.phase,
        })
    }

    // --- Speech ---

    /// Synthesizes speech for arbitrary text. Output only; never touches session state.
    pub async fn narrate(&self, text: &str) -> EngineResult<Vec<u8>> {
        self.bounded("synthesize", self.speaker.synthesize(text)).await
    }

    /// Runs a collaborator call under the configured timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = PortResult<T>>,
    ) -> EngineResult<T> {
        let after = self.config.external_timeout;
        match tokio::time::timeout(after, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(EngineError::ExternalService(e.to_string())),
            Err(_) => {
                warn!(operation, ?after, "External call timed out");
                Err(EngineError::ExternalServiceTimeout { operation, after })
            }
        }
    }
}

fn current_prompt(session: &Session) -> Option<QuizPrompt> {
    let question = session.current_question()?.clone();
    Some(QuizPrompt {
        session_id: session.id,
        phase: session.phase,
        question,
        question_number: session.question_index + 1,
        total_questions: session.questions.len(),
        score: session.score,
    })
}

/// Keeps the well-formed drafts, up to `count` of them.
fn validate_drafts(
    id: Uuid,
    drafts: Vec<DraftQuestion>,
    count: usize,
) -> EngineResult<Vec<Question>> {
    let received = drafts.len();
    let mut first_error = None;
    let questions: Vec<Question> = drafts
        .into_iter()
        .filter_map(|draft| match draft.validate() {
            Ok(question) => Some(question),
            Err(reason) => {
                warn!(session_id = %id, %reason, "Dropping malformed question");
                first_error.get_or_insert(reason);
                None
            }
        })
        .take(count)
        .collect();

    if questions.is_empty() {
        let detail = first_error.unwrap_or_else(|| "no questions returned".to_string());
        return Err(EngineError::MalformedGeneration(format!(
            "0 usable questions out of {}: {}",
            received, detail
        )));
    }
    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PerformanceTier;
    use crate::fallback::TOO_SHORT_SUMMARY;
    use crate::ports::{MockContentModel, MockDocumentExtractor, MockSpeaker, PortError};
    use async_trait::async_trait;
    use futures::future::join_all;
    use tokio::sync::Notify;

    const LABELS: [&str; 4] = ["A", "B", "C", "D"];

    fn sample_text() -> String {
        "Photosynthesis converts light energy into chemical energy. ".repeat(9)[..500].to_string()
    }

    fn drafts(n: usize) -> Vec<DraftQuestion> {
        (0..n)
            .map(|i| DraftQuestion {
                question: format!("Question {}?", i + 1),
                options: vec![
                    format!("A. First {}", i),
                    format!("B. Second {}", i),
                    format!("C. Third {}", i),
                    format!("D. Fourth {}", i),
                ],
                correct_answer: LABELS[i % 4].to_string(),
                explanation: format!("Explanation {}", i + 1),
            })
            .collect()
    }

    fn extractor_returning(text: String) -> MockDocumentExtractor {
        let mut extractor = MockDocumentExtractor::new();
        extractor
            .expect_extract_text()
            .returning(move |_| Ok(text.clone()));
        extractor
    }

    fn content_with(n: usize) -> MockContentModel {
        let mut content = MockContentModel::new();
        content
            .expect_summarize()
            .returning(|_| Ok("A concise spoken summary.".to_string()));
        content
            .expect_generate_questions()
            .returning(move |_, count| Ok(drafts(n.min(count))));
        content
    }

    fn build(
        extractor: impl DocumentExtractor + 'static,
        content: impl ContentModel + 'static,
        config: EngineConfig,
    ) -> SessionEngine {
        SessionEngine::new(
            Arc::new(SessionStore::new()),
            Arc::new(extractor),
            Arc::new(content),
            Arc::new(MockSpeaker::new()),
            config,
        )
    }

    fn engine_with(content: MockContentModel) -> SessionEngine {
        build(extractor_returning(sample_text()), content, EngineConfig::default())
    }

    async fn assert_invariants(engine: &SessionEngine, id: Uuid) {
        let snapshot = engine.snapshot(id).await.unwrap();
        assert!(snapshot.question_index <= snapshot.total_questions);
        assert!(snapshot.score <= snapshot.question_index);
    }

    /// Creates a session, ingests the sample document and starts a quiz.
    async fn quiz_ready(engine: &SessionEngine) -> (Uuid, QuizStarted) {
        let id = engine.new_session().await.id;
        engine.ingest(id, b"%PDF").await.unwrap();
        let started = engine.start_quiz(id, Some(5)).await.unwrap();
        (id, started)
    }

    // --- Ingest ---

    #[tokio::test]
    async fn ingest_extracts_and_auto_summarizes() {
        let engine = engine_with(content_with(5));
        let id = engine.new_session().await.id;

        let outcome = engine.ingest(id, b"%PDF").await.unwrap();

        assert_eq!(outcome.phase, SessionPhase::SummaryGenerated);
        assert_eq!(outcome.document_chars, 500);
        let summary = outcome.summary.expect("ingest should summarize");
        assert_eq!(summary.summary, "A concise spoken summary.");
        assert_eq!(summary.source, ContentSource::Model);
    }

    #[tokio::test]
    async fn ingest_with_empty_text_fails_and_leaves_session_untouched() {
        let engine = build(
            extractor_returning("   \n ".to_string()),
            MockContentModel::new(),
            EngineConfig::default(),
        );
        let id = engine.new_session().await.id;
        let before = engine.snapshot(id).await.unwrap();

        let err = engine.ingest(id, b"scanned image").await.unwrap_err();

        assert!(matches!(err, EngineError::ExtractionFailed(_)));
        assert_eq!(engine.snapshot(id).await.unwrap(), before);
        assert_eq!(before.phase, SessionPhase::AwaitingDocument);
    }

    #[tokio::test]
    async fn ingest_surfaces_extractor_errors_as_extraction_failed() {
        let mut extractor = MockDocumentExtractor::new();
        extractor
            .expect_extract_text()
            .returning(|_| Err(PortError::Unexpected("corrupt xref table".to_string())));
        let engine = build(extractor, MockContentModel::new(), EngineConfig::default());
        let id = engine.new_session().await.id;

        let err = engine.ingest(id, b"junk").await.unwrap_err();

        match err {
            EngineError::ExtractionFailed(reason) => assert!(reason.contains("corrupt xref")),
            other => panic!("expected ExtractionFailed, got {:?}", other),
        }
        let snapshot = engine.snapshot(id).await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::AwaitingDocument);
    }

    #[tokio::test]
    async fn ingest_falls_back_when_summarization_fails() {
        let mut content = MockContentModel::new();
        content
            .expect_summarize()
            .returning(|_| Err(PortError::Unexpected("quota exceeded".to_string())));
        let engine = engine_with(content);
        let id = engine.new_session().await.id;

        let outcome = engine.ingest(id, b"%PDF").await.unwrap();

        assert_eq!(outcome.phase, SessionPhase::SummaryGenerated);
        let summary = outcome.summary.unwrap();
        assert!(summary.summary.starts_with("Here's a basic summary of the document:"));
        assert!(matches!(
            summary.source,
            ContentSource::Fallback(EngineError::ExternalService(_))
        ));
    }

    #[tokio::test]
    async fn ingest_is_rejected_once_a_document_is_loaded() {
        let engine = engine_with(content_with(5));
        let id = engine.new_session().await.id;
        engine.ingest(id, b"%PDF").await.unwrap();

        let err = engine.ingest(id, b"%PDF").await.unwrap_err();

        assert_eq!(
            err,
            EngineError::InvalidState {
                operation: "ingest",
                state: SessionPhase::SummaryGenerated,
            }
        );
    }

    #[tokio::test]
    async fn ingest_unknown_session_is_not_found() {
        let engine = engine_with(content_with(5));
        let id = Uuid::new_v4();
        assert_eq!(
            engine.ingest(id, b"%PDF").await.unwrap_err(),
            EngineError::NotFound(id)
        );
    }

    #[tokio::test]
    async fn open_with_document_keeps_only_accepted_uploads() {
        let engine = build(
            extractor_returning(" \n\t ".to_string()),
            MockContentModel::new(),
            EngineConfig::default(),
        );
        for _ in 0..3 {
            let err = engine.open_with_document(b"blank").await.unwrap_err();
            assert!(matches!(err, EngineError::ExtractionFailed(_)));
        }
        assert!(engine.store().is_empty());

        let engine = engine_with(content_with(5));
        let outcome = engine.open_with_document(b"%PDF").await.unwrap();
        assert_eq!(outcome.phase, SessionPhase::SummaryGenerated);
        assert_eq!(engine.store().len(), 1);
        assert_eq!(
            engine.snapshot(outcome.session_id).await.unwrap().phase,
            SessionPhase::SummaryGenerated
        );
    }

    #[tokio::test]
    async fn short_documents_skip_the_model() {
        let mut content = MockContentModel::new();
        content.expect_summarize().never();
        let engine = build(
            extractor_returning("Hi.".to_string()),
            content,
            EngineConfig::default(),
        );
        let id = engine.new_session().await.id;

        let summary = engine.ingest(id, b"x").await.unwrap().summary.unwrap();

        assert_eq!(summary.summary, TOO_SHORT_SUMMARY);
        assert_eq!(summary.source, ContentSource::TooShort);
    }

    // --- Summarize ---

    #[tokio::test]
    async fn manual_summarize_moves_document_ready_to_summary_generated() {
        let config = EngineConfig {
            auto_summarize: false,
            ..EngineConfig::default()
        };
        let engine = build(extractor_returning(sample_text()), content_with(5), config);
        let id = engine.new_session().await.id;

        let outcome = engine.ingest(id, b"%PDF").await.unwrap();
        assert_eq!(outcome.phase, SessionPhase::DocumentReady);
        assert!(outcome.summary.is_none());

        let summary = engine.summarize(id).await.unwrap();
        assert_eq!(summary.phase, SessionPhase::SummaryGenerated);

        // Regenerating is allowed while the summary is current.
        let again = engine.summarize(id).await.unwrap();
        assert_eq!(again.phase, SessionPhase::SummaryGenerated);
    }

    #[tokio::test]
    async fn summarize_without_document_is_invalid() {
        let engine = engine_with(content_with(5));
        let id = engine.new_session().await.id;

        let err = engine.summarize(id).await.unwrap_err();

        assert_eq!(
            err,
            EngineError::InvalidState {
                operation: "summarize",
                state: SessionPhase::AwaitingDocument,
            }
        );
    }

    #[tokio::test]
    async fn empty_model_summary_uses_fallback() {
        let mut content = MockContentModel::new();
        content.expect_summarize().returning(|_| Ok("  ".to_string()));
        let engine = engine_with(content);
        let id = engine.new_session().await.id;

        let summary = engine.ingest(id, b"%PDF").await.unwrap().summary.unwrap();

        assert!(matches!(
            summary.source,
            ContentSource::Fallback(EngineError::MalformedGeneration(_))
        ));
        assert!(!summary.summary.is_empty());
    }

    // --- Start quiz ---

    #[tokio::test]
    async fn start_quiz_requires_a_summary() {
        let config = EngineConfig {
            auto_summarize: false,
            ..EngineConfig::default()
        };
        let engine = build(extractor_returning(sample_text()), content_with(5), config);
        let id = engine.new_session().await.id;

        let err = engine.start_quiz(id, None).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                state: SessionPhase::AwaitingDocument,
                ..
            }
        ));

        engine.ingest(id, b"%PDF").await.unwrap();
        let err = engine.start_quiz(id, None).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                state: SessionPhase::DocumentReady,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn start_quiz_substitutes_fallback_for_malformed_output() {
        let mut content = MockContentModel::new();
        content
            .expect_summarize()
            .returning(|_| Ok("Summary.".to_string()));
        content.expect_generate_questions().returning(|_, _| {
            Ok(vec![DraftQuestion {
                question: "Only two options?".to_string(),
                options: vec!["A. Yes".to_string(), "B. No".to_string()],
                correct_answer: "A".to_string(),
                explanation: String::new(),
            }])
        });
        let engine = engine_with(content);

        let (_, started) = quiz_ready(&engine).await;

        assert_eq!(started.prompt.total_questions, 1);
        assert_eq!(
            started.prompt.question.text,
            "Based on the document summary, what was the main topic discussed?"
        );
        assert!(matches!(
            started.source,
            ContentSource::Fallback(EngineError::MalformedGeneration(_))
        ));
    }

    #[tokio::test]
    async fn start_quiz_substitutes_fallback_when_model_fails() {
        let mut content = MockContentModel::new();
        content
            .expect_summarize()
            .returning(|_| Ok("Summary.".to_string()));
        content
            .expect_generate_questions()
            .returning(|_, _| Err(PortError::Unexpected("503".to_string())));
        let engine = engine_with(content);

        let (_, started) = quiz_ready(&engine).await;

        assert_eq!(started.prompt.total_questions, 1);
        assert!(started.source.is_fallback());
    }

    #[tokio::test]
    async fn start_quiz_drops_malformed_items_and_truncates() {
        let mut content = MockContentModel::new();
        content
            .expect_summarize()
            .returning(|_| Ok("Summary.".to_string()));
        content.expect_generate_questions().returning(|_, _| {
            let mut set = drafts(7);
            set[1].correct_answer = "E".to_string();
            Ok(set)
        });
        let engine = engine_with(content);

        let (_, started) = quiz_ready(&engine).await;

        assert_eq!(started.prompt.total_questions, 5);
        assert_eq!(started.source, ContentSource::Model);
    }

    #[tokio::test]
    async fn start_quiz_clamps_requested_count() {
        let mut content = MockContentModel::new();
        content
            .expect_summarize()
            .returning(|_| Ok("Summary.".to_string()));
        content
            .expect_generate_questions()
            .withf(|_, count| *count == 1)
            .returning(|_, count| Ok(drafts(count)));
        let engine = engine_with(content);
        let id = engine.new_session().await.id;
        engine.ingest(id, b"%PDF").await.unwrap();

        let started = engine.start_quiz(id, Some(0)).await.unwrap();

        assert_eq!(started.prompt.total_questions, 1);
    }

    #[tokio::test]
    async fn start_quiz_resets_cursor_and_score_after_an_attempt() {
        let engine = engine_with(content_with(5));
        let (id, started) = quiz_ready(&engine).await;
        let correct = started.prompt.question.correct_option.to_string();
        engine.submit_answer(id, &correct).await.unwrap();
        engine.submit_answer(id, "A").await.unwrap();

        let restarted = engine.start_quiz(id, Some(5)).await.unwrap();

        assert_eq!(restarted.prompt.question_number, 1);
        assert_eq!(restarted.prompt.score, 0);
        let snapshot = engine.snapshot(id).await.unwrap();
        assert_eq!(snapshot.question_index, 0);
        assert_eq!(snapshot.score, 0);
        assert_eq!(snapshot.phase, SessionPhase::QuizActive);
    }

    // --- Answers ---

    #[tokio::test]
    async fn full_quiz_answered_correctly_scores_one_hundred_percent() {
        let engine = engine_with(content_with(5));
        let (id, started) = quiz_ready(&engine).await;
        assert_eq!(started.prompt.total_questions, 5);
        assert!(started
            .prompt
            .question
            .options
            .iter()
            .all(|o| !o.is_empty()));

        let mut next = Some(started.prompt.question);
        let mut last = None;
        while let Some(question) = next.take() {
            let outcome = engine
                .submit_answer(id, &question.correct_option.to_string())
                .await
                .unwrap();
            assert!(outcome.correct);
            assert!(outcome.feedback.starts_with("Correct!"));
            assert_invariants(&engine, id).await;
            next = outcome.next_question.clone();
            last = Some(outcome);
        }

        let last = last.unwrap();
        assert_eq!(last.phase, SessionPhase::QuizComplete);
        assert_eq!(last.score, 5);
        let report = last.report.expect("last answer carries the report");
        assert_eq!(report.percentage, 100.0);
        assert_eq!(report.tier, PerformanceTier::Excellent);

        let report = engine.report(id).await.unwrap();
        assert_eq!(report.report.score, 5);
        assert_eq!(report.phase, SessionPhase::QuizComplete);
    }

    #[tokio::test]
    async fn lowercase_labels_match_uppercase() {
        let engine = engine_with(content_with(5));
        let (id, started) = quiz_ready(&engine).await;
        let lower = started
            .prompt
            .question
            .correct_option
            .to_string()
            .to_lowercase();

        let outcome = engine.submit_answer(id, &lower).await.unwrap();

        assert!(outcome.correct);
        assert_eq!(outcome.submitted, Some(started.prompt.question.correct_option));
        assert_eq!(outcome.score, 1);
    }

    #[tokio::test]
    async fn unrecognized_label_is_scored_incorrect() {
        let engine = engine_with(content_with(5));
        let (id, _) = quiz_ready(&engine).await;

        let outcome = engine.submit_answer(id, "Z").await.unwrap();

        assert!(!outcome.correct);
        assert_eq!(outcome.submitted, None);
        assert_eq!(outcome.answered, 1);
        assert_eq!(outcome.score, 0);
        assert_eq!(
            outcome.feedback,
            "Incorrect. The right answer is A. Explanation 1"
        );
    }

    #[tokio::test]
    async fn submit_outside_active_quiz_does_not_mutate() {
        let engine = engine_with(content_with(5));
        let id = engine.new_session().await.id;
        engine.ingest(id, b"%PDF").await.unwrap();
        let before = engine.snapshot(id).await.unwrap();

        let err = engine.submit_answer(id, "A").await.unwrap_err();

        assert_eq!(
            err,
            EngineError::InvalidState {
                operation: "submit_answer",
                state: SessionPhase::SummaryGenerated,
            }
        );
        assert_eq!(engine.snapshot(id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn report_tiers_for_partial_scores() {
        for (correct_answers, percentage, tier) in [
            (4, 80.0, PerformanceTier::Excellent),
            (3, 60.0, PerformanceTier::Good),
            (1, 20.0, PerformanceTier::NeedsReview),
        ] {
            let engine = engine_with(content_with(5));
            let (id, started) = quiz_ready(&engine).await;
            let mut next = Some(started.prompt.question);
            let mut answered = 0;
            while let Some(question) = next.take() {
                let answer = if answered < correct_answers {
                    question.correct_option.to_string()
                } else {
                    "Z".to_string()
                };
                next = engine.submit_answer(id, &answer).await.unwrap().next_question;
                answered += 1;
            }

            let report = engine.report(id).await.unwrap().report;
            assert_eq!(report.percentage, percentage);
            assert_eq!(report.tier, tier);
        }
    }

    #[tokio::test]
    async fn report_before_completion_is_invalid() {
        let engine = engine_with(content_with(5));
        let (id, _) = quiz_ready(&engine).await;

        let err = engine.report(id).await.unwrap_err();

        assert!(matches!(
            err,
            EngineError::InvalidState {
                operation: "report",
                state: SessionPhase::QuizActive,
            }
        ));
    }

    // --- Restart and reset ---

    #[tokio::test]
    async fn restart_reuses_the_question_set() {
        let engine = engine_with(content_with(2));
        let (id, started) = quiz_ready(&engine).await;
        engine.submit_answer(id, "A").await.unwrap();
        engine.submit_answer(id, "A").await.unwrap();

        let prompt = engine.restart_quiz(id).await.unwrap();

        assert_eq!(prompt.phase, SessionPhase::QuizActive);
        assert_eq!(prompt.question, started.prompt.question);
        assert_eq!(prompt.total_questions, 2);
        assert_eq!(prompt.score, 0);
        assert_invariants(&engine, id).await;
    }

    #[tokio::test]
    async fn restart_requires_completed_quiz() {
        let engine = engine_with(content_with(2));
        let (id, _) = quiz_ready(&engine).await;

        assert!(matches!(
            engine.restart_quiz(id).await.unwrap_err(),
            EngineError::InvalidState { .. }
        ));
    }

    #[tokio::test]
    async fn new_document_discards_everything() {
        let engine = engine_with(content_with(5));
        let (id, _) = quiz_ready(&engine).await;

        let snapshot = engine.new_document(id).await.unwrap();

        assert_eq!(snapshot.phase, SessionPhase::AwaitingDocument);
        assert!(!snapshot.has_document);
        assert!(snapshot.summary.is_none());
        assert_eq!(snapshot.total_questions, 0);

        // The reset session accepts a new document.
        let outcome = engine.ingest(id, b"%PDF").await.unwrap();
        assert_eq!(outcome.phase, SessionPhase::SummaryGenerated);
    }

    // --- Concurrency ---

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_answers_never_overrun_the_quiz() {
        let engine = Arc::new(engine_with(content_with(5)));
        let (id, _) = quiz_ready(&engine).await;

        let results = join_all((0..20).map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.submit_answer(id, "A").await })
        }))
        .await;

        let accepted = results
            .iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        let rejected = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Ok(Err(EngineError::InvalidState {
                        state: SessionPhase::QuizComplete,
                        ..
                    }))
                )
            })
            .count();
        assert_eq!(accepted, 5);
        assert_eq!(rejected, 15);

        let snapshot = engine.snapshot(id).await.unwrap();
        assert_eq!(snapshot.question_index, 5);
        assert_eq!(snapshot.phase, SessionPhase::QuizComplete);
        assert_invariants(&engine, id).await;
    }

    #[tokio::test]
    async fn sessions_progress_independently() {
        let engine = engine_with(content_with(3));
        let (first, _) = quiz_ready(&engine).await;
        let second = engine.new_session().await.id;

        engine.submit_answer(first, "A").await.unwrap();

        let other = engine.snapshot(second).await.unwrap();
        assert_eq!(other.phase, SessionPhase::AwaitingDocument);
        assert_eq!(other.question_index, 0);
        assert_eq!(engine.snapshot(first).await.unwrap().question_index, 1);
    }

    /// A content model that blocks on `summarize` until released.
    struct GatedModel {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ContentModel for GatedModel {
        async fn summarize(&self, _text: &str) -> PortResult<String> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok("Late summary.".to_string())
        }

        async fn generate_questions(
            &self,
            _text: &str,
            count: usize,
        ) -> PortResult<Vec<DraftQuestion>> {
            Ok(drafts(count))
        }
    }

    #[tokio::test]
    async fn result_is_discarded_if_session_changed_during_external_call() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let config = EngineConfig {
            auto_summarize: false,
            ..EngineConfig::default()
        };
        let engine = Arc::new(build(
            extractor_returning(sample_text()),
            GatedModel {
                entered: entered.clone(),
                release: release.clone(),
            },
            config,
        ));
        let id = engine.new_session().await.id;
        engine.ingest(id, b"%PDF").await.unwrap();

        let pending = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.summarize(id).await })
        };
        entered.notified().await;
        // The session lock is free while the model call is in flight.
        engine.new_document(id).await.unwrap();
        release.notify_one();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err, EngineError::Conflict { operation: "summarize" });
        let snapshot = engine.snapshot(id).await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::AwaitingDocument);
        assert!(snapshot.summary.is_none());
    }

    #[tokio::test]
    async fn ingest_survives_a_summary_that_loses_the_race() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let engine = Arc::new(build(
            extractor_returning(sample_text()),
            GatedModel {
                entered: entered.clone(),
                release: release.clone(),
            },
            EngineConfig::default(),
        ));
        let id = engine.new_session().await.id;

        let pending = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.ingest(id, b"%PDF").await })
        };
        entered.notified().await;
        engine.new_document(id).await.unwrap();
        release.notify_one();

        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome.phase, SessionPhase::DocumentReady);
        assert_eq!(outcome.document_chars, 500);
        assert!(outcome.summary.is_none());

        let snapshot = engine.snapshot(id).await.unwrap();
        assert_eq!(snapshot.phase, SessionPhase::AwaitingDocument);
        assert!(snapshot.summary.is_none());
    }

    /// A content model that never answers in time.
    struct StalledModel;

    #[async_trait]
    impl ContentModel for StalledModel {
        async fn summarize(&self, _text: &str) -> PortResult<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".to_string())
        }

        async fn generate_questions(
            &self,
            _text: &str,
            _count: usize,
        ) -> PortResult<Vec<DraftQuestion>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn stalled_model_times_out_into_fallbacks() {
        let config = EngineConfig {
            external_timeout: Duration::from_millis(20),
            ..EngineConfig::default()
        };
        let engine = build(extractor_returning(sample_text()), StalledModel, config);
        let id = engine.new_session().await.id;

        let summary = engine.ingest(id, b"%PDF").await.unwrap().summary.unwrap();
        assert!(matches!(
            summary.source,
            ContentSource::Fallback(EngineError::ExternalServiceTimeout {
                operation: "summarize",
                ..
            })
        ));

        let started = engine.start_quiz(id, None).await.unwrap();
        assert!(matches!(
            started.source,
            ContentSource::Fallback(EngineError::ExternalServiceTimeout {
                operation: "generate_questions",
                ..
            })
        ));
        assert_eq!(started.prompt.total_questions, 1);
    }

    // --- Speech ---

    #[tokio::test]
    async fn narrate_passes_audio_through_and_surfaces_errors() {
        let mut speaker = MockSpeaker::new();
        speaker
            .expect_synthesize()
            .withf(|text| text.to_string() == "Hello")
            .returning(|_| Ok(vec![1, 2, 3]));
        speaker
            .expect_synthesize()
            .withf(|text| text.to_string() != "Hello")
            .returning(|_| Err(PortError::Unexpected("voice unavailable".to_string())));
        let engine = SessionEngine::new(
            Arc::new(SessionStore::new()),
            Arc::new(MockDocumentExtractor::new()),
            Arc::new(MockContentModel::new()),
            Arc::new(speaker),
            EngineConfig::default(),
        );

        assert_eq!(engine.narrate("Hello").await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            engine.narrate("Other").await.unwrap_err(),
            EngineError::ExternalService(_)
        ));
    }
}
