//! docqa-llm - Generation collaborator
//!
//! This crate provides [`OpenAiGenerator`], a chat-completions client for any
//! OpenAI-compatible endpoint (Groq by default). The query expander uses it to
//! classify and expand questions.

mod openai;

pub use openai::OpenAiGenerator;

// Re-export the Generator trait for convenience
pub use docqa_core::Generator;
