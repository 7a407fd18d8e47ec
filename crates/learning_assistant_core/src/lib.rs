pub mod domain;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod ports;
pub mod store;

pub use domain::{
    DraftQuestion, OptionLabel, PerformanceTier, Question, QuizReport, Session, SessionPhase,
    SessionSnapshot,
};
pub use engine::{
    AnswerOutcome, ContentSource, EngineConfig, IngestOutcome, Operation, QuizPrompt, QuizStarted,
    ReportOutcome, SessionEngine, SummaryOutcome,
};
pub use error::{EngineError, EngineResult};
pub use ports::{ContentModel, DocumentExtractor, PortError, PortResult, Speaker};
pub use store::{SessionHandle, SessionStore};
