//! crates/learning_assistant_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any transport or serialization format.

use std::fmt;
use uuid::Uuid;

/// Number of choices every quiz question carries.
pub const OPTIONS_PER_QUESTION: usize = 4;

//=========================================================================================
// Session Lifecycle
//=========================================================================================

/// The lifecycle phase of a learning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    AwaitingDocument,
    DocumentReady,
    SummaryGenerated,
    QuizActive,
    QuizComplete,
}

impl SessionPhase {
    /// The wire name of the phase, as embedded in every operation payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::AwaitingDocument => "awaiting_document",
            SessionPhase::DocumentReady => "document_ready",
            SessionPhase::SummaryGenerated => "summary_generated",
            SessionPhase::QuizActive => "quiz_active",
            SessionPhase::QuizComplete => "quiz_complete",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The per-user unit of document and quiz state.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub document_text: String,
    pub summary: String,
    pub questions: Vec<Question>,
    pub question_index: usize,
    pub score: usize,
    pub phase: SessionPhase,
    /// Bumped on every mutation. Used to detect changes made while an external call was in flight.
    pub(crate) revision: u64,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            document_text: String::new(),
            summary: String::new(),
            questions: Vec::new(),
            question_index: 0,
            score: 0,
            phase: SessionPhase::AwaitingDocument,
            revision: 0,
        }
    }

    /// The question the cursor currently points at, if the quiz is still running.
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.question_index)
    }

    pub(crate) fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Drops everything derived from the current document and returns to `AwaitingDocument`.
    pub(crate) fn reset(&mut self) {
        self.document_text.clear();
        self.summary.clear();
        self.questions.clear();
        self.question_index = 0;
        self.score = 0;
        self.phase = SessionPhase::AwaitingDocument;
        self.bump();
    }

    /// Starts a new quiz attempt over the given question set.
    pub(crate) fn begin_attempt(&mut self, questions: Option<Vec<Question>>) {
        if let Some(questions) = questions {
            self.questions = questions;
        }
        self.question_index = 0;
        self.score = 0;
        self.phase = SessionPhase::QuizActive;
        self.bump();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            phase: self.phase,
            has_document: !self.document_text.is_empty(),
            summary: (!self.summary.is_empty()).then(|| self.summary.clone()),
            question_index: self.question_index,
            total_questions: self.questions.len(),
            score: self.score,
        }
    }
}

/// A read-only view of a session, safe to hand to the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub phase: SessionPhase,
    pub has_document: bool,
    pub summary: Option<String>,
    pub question_index: usize,
    pub total_questions: usize,
    pub score: usize,
}

//=========================================================================================
// Quiz Questions
//=========================================================================================

/// One of the four fixed answer labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionLabel {
    A,
    B,
    C,
    D,
}

impl OptionLabel {
    pub const ALL: [OptionLabel; OPTIONS_PER_QUESTION] =
        [OptionLabel::A, OptionLabel::B, OptionLabel::C, OptionLabel::D];

    pub fn as_char(&self) -> char {
        match self {
            OptionLabel::A => 'A',
            OptionLabel::B => 'B',
            OptionLabel::C => 'C',
            OptionLabel::D => 'D',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(OptionLabel::A),
            'B' => Some(OptionLabel::B),
            'C' => Some(OptionLabel::C),
            'D' => Some(OptionLabel::D),
            _ => None,
        }
    }

    /// Normalizes a user's answer to a label.
    ///
    /// Accepts a bare letter in any case (`"b"`, `" B "`) and the spoken form
    /// (`"option b"`, `"Option B."`). Anything else yields `None`, which the
    /// engine scores as an incorrect answer rather than rejecting.
    pub fn parse_answer(input: &str) -> Option<Self> {
        let upper = input.trim().to_ascii_uppercase();
        let rest = upper.strip_prefix("OPTION").unwrap_or(&upper);
        let rest = rest.trim().trim_end_matches(['.', '!', ',']).trim();

        let mut chars = rest.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => None,
        }
    }
}

impl fmt::Display for OptionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A validated quiz item with exactly four labeled options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    /// Option texts in label order: index 0 is `A`, index 3 is `D`.
    pub options: [String; OPTIONS_PER_QUESTION],
    pub correct_option: OptionLabel,
    pub explanation: String,
}

impl Question {
    pub fn option(&self, label: OptionLabel) -> &str {
        &self.options[label as usize]
    }

    /// Iterates the options together with their labels, in fixed `A`..`D` order.
    pub fn labeled_options(&self) -> impl Iterator<Item = (OptionLabel, &str)> {
        OptionLabel::ALL
            .into_iter()
            .zip(self.options.iter().map(String::as_str))
    }
}

/// The unvalidated shape of a question as a `ContentModel` emits it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DraftQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub explanation: String,
}

impl DraftQuestion {
    /// Checks the draft has the required shape and turns it into a `Question`.
    ///
    /// Option texts may carry their own label prefix (`"A. Paris"`); it is
    /// removed when it matches the option's position.
    pub fn validate(self) -> Result<Question, String> {
        let text = self.question.trim().to_string();
        if text.is_empty() {
            return Err("question text is empty".to_string());
        }
        if self.options.len() != OPTIONS_PER_QUESTION {
            return Err(format!(
                "expected {} options, got {}",
                OPTIONS_PER_QUESTION,
                self.options.len()
            ));
        }

        let correct_option = OptionLabel::parse_answer(&self.correct_answer)
            .ok_or_else(|| format!("invalid correct answer label '{}'", self.correct_answer))?;

        let mut options: [String; OPTIONS_PER_QUESTION] = Default::default();
        for ((slot, raw), label) in options.iter_mut().zip(self.options).zip(OptionLabel::ALL) {
            let cleaned = strip_label_prefix(raw.trim(), label).trim().to_string();
            if cleaned.is_empty() {
                return Err(format!("option {} is empty", label));
            }
            *slot = cleaned;
        }

        for (i, a) in options.iter().enumerate() {
            if options[i + 1..].iter().any(|b| a.eq_ignore_ascii_case(b)) {
                return Err(format!("duplicate option '{}'", a));
            }
        }

        Ok(Question {
            text,
            options,
            correct_option,
            explanation: self.explanation.trim().to_string(),
        })
    }
}

fn strip_label_prefix(option: &str, label: OptionLabel) -> &str {
    let mut chars = option.chars();
    let first = chars.next().and_then(OptionLabel::from_char);
    let sep = chars.next();
    match (first, sep) {
        (Some(l), Some('.' | ')' | ':')) if l == label => &option[2..],
        _ => option,
    }
}

//=========================================================================================
// Quiz Reporting
//=========================================================================================

/// The qualitative band a quiz result falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceTier {
    Excellent,
    Good,
    NeedsReview,
}

impl PerformanceTier {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 80.0 {
            PerformanceTier::Excellent
        } else if percentage >= 60.0 {
            PerformanceTier::Good
        } else {
            PerformanceTier::NeedsReview
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PerformanceTier::Excellent => {
                "Excellent work! You have a great understanding of the material."
            }
            PerformanceTier::Good => "Good job! You understood most of the key concepts.",
            PerformanceTier::NeedsReview => {
                "You might want to review the material again to improve your understanding."
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceTier::Excellent => "excellent",
            PerformanceTier::Good => "good",
            PerformanceTier::NeedsReview => "needs_review",
        }
    }
}

/// The final result of one quiz attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizReport {
    pub score: usize,
    pub total_questions: usize,
    pub percentage: f64,
    pub tier: PerformanceTier,
    pub message: String,
}

impl QuizReport {
    pub fn new(score: usize, total_questions: usize) -> Self {
        let percentage = if total_questions == 0 {
            0.0
        } else {
            100.0 * score as f64 / total_questions as f64
        };
        let tier = PerformanceTier::from_percentage(percentage);
        let message = format!(
            "Quiz completed! You scored {} out of {} questions correct. That's {:.1} percent! {}",
            score,
            total_questions,
            percentage,
            tier.message()
        );
        Self {
            score,
            total_questions,
            percentage,
            tier,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> DraftQuestion {
        DraftQuestion {
            question: "What is the capital of France?".to_string(),
            options: vec![
                "A. Paris".to_string(),
                "B. Lyon".to_string(),
                "C. Nice".to_string(),
                "D. Lille".to_string(),
            ],
            correct_answer: "A".to_string(),
            explanation: "Paris is the capital.".to_string(),
        }
    }

    #[test]
    fn parse_answer_accepts_letters_in_any_case() {
        assert_eq!(OptionLabel::parse_answer("b"), Some(OptionLabel::B));
        assert_eq!(OptionLabel::parse_answer(" B "), Some(OptionLabel::B));
        assert_eq!(OptionLabel::parse_answer("d"), Some(OptionLabel::D));
    }

    #[test]
    fn parse_answer_accepts_spoken_form() {
        assert_eq!(OptionLabel::parse_answer("option c"), Some(OptionLabel::C));
        assert_eq!(OptionLabel::parse_answer("Option A."), Some(OptionLabel::A));
    }

    #[test]
    fn parse_answer_rejects_unknown_labels() {
        assert_eq!(OptionLabel::parse_answer("Z"), None);
        assert_eq!(OptionLabel::parse_answer(""), None);
        assert_eq!(OptionLabel::parse_answer("AB"), None);
        assert_eq!(OptionLabel::parse_answer("option"), None);
    }

    #[test]
    fn validate_strips_matching_label_prefixes() {
        let question = draft().validate().expect("draft should be valid");
        assert_eq!(question.option(OptionLabel::A), "Paris");
        assert_eq!(question.option(OptionLabel::D), "Lille");
        assert_eq!(question.correct_option, OptionLabel::A);
    }

    #[test]
    fn validate_keeps_options_without_prefix() {
        let mut d = draft();
        d.options = vec!["Paris".into(), "Lyon".into(), "Nice".into(), "Lille".into()];
        let question = d.validate().unwrap();
        assert_eq!(question.option(OptionLabel::B), "Lyon");
    }

    #[test]
    fn validate_rejects_wrong_option_count() {
        let mut d = draft();
        d.options.pop();
        assert!(d.validate().unwrap_err().contains("expected 4 options"));
    }

    #[test]
    fn validate_rejects_bad_correct_label() {
        let mut d = draft();
        d.correct_answer = "E".to_string();
        assert!(d.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_options() {
        let mut d = draft();
        d.options[2] = "C. paris".to_string();
        assert!(d.validate().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn report_tiers_follow_percentage_bands() {
        let excellent = QuizReport::new(4, 5);
        assert_eq!(excellent.percentage, 80.0);
        assert_eq!(excellent.tier, PerformanceTier::Excellent);

        let good = QuizReport::new(3, 5);
        assert_eq!(good.percentage, 60.0);
        assert_eq!(good.tier, PerformanceTier::Good);

        let review = QuizReport::new(1, 5);
        assert_eq!(review.percentage, 20.0);
        assert_eq!(review.tier, PerformanceTier::NeedsReview);
    }

    #[test]
    fn report_guards_empty_question_set() {
        let report = QuizReport::new(0, 0);
        assert_eq!(report.percentage, 0.0);
        assert_eq!(report.tier, PerformanceTier::NeedsReview);
    }

    #[test]
    fn report_message_formats_one_decimal() {
        let report = QuizReport::new(2, 3);
        assert!(report.message.contains("You scored 2 out of 3"));
        assert!(report.message.contains("66.7 percent"));
    }
}
