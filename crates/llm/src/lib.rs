//! Response generation
//!
//! Features:
//! - Context history to request conversion (roles, tools, temperature)
//! - Streaming fragment delivery with cancellation at every fetch
//! - Structured and inline (`<tool_call>` tagged) tool-call detection
//! - Per-generation timing and size statistics

pub mod driver;
pub mod prompt;
pub mod tool_call;

pub use driver::{GenerationEvent, GenerationStats, ResponseGenerator};
pub use prompt::{estimate_tokens, PromptBuilder};
pub use tool_call::{parse_tool_call, ToolCallScanner};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Invalid tool call: {0}")]
    InvalidToolCall(String),
}

impl From<LlmError> for voice_loop_core::Error {
    fn from(err: LlmError) -> Self {
        voice_loop_core::Error::GenerationFailure(err.to_string())
    }
}
