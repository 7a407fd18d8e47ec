pub mod content_llm;
pub mod extractor;
pub mod tts;

pub use content_llm::OpenAiContentAdapter;
pub use extractor::PlainTextExtractor;
pub use tts::OpenAiTtsAdapter;
