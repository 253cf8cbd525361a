//! Completion gateway and text-generation backends.

pub mod completion;
pub mod gemini;
pub mod llm;

/// Ordered-fallback gateway and its selection modes.
pub use completion::{CompletionGateway, SelectionMode};
/// Gemini `generateContent` backend.
pub use gemini::GeminiBackend;
/// Backend trait and OpenAI-compatible implementation.
pub use llm::{BackendCandidate, CANARY_PROMPT, CompletionBackend, OpenAiBackend};
