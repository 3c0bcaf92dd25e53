//! Error taxonomy shared by every stage of the loop
//!
//! Stage crates define their own error enums and convert into [`Error`]
//! at the orchestrator boundary, where everything except
//! [`Error::Configuration`] is recovered.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Recognition failure: {0}")]
    RecognitionFailure(String),

    #[error("Generation failure: {0}")]
    GenerationFailure(String),

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecutionFailure { tool: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool busy: call {pending} is still outstanding")]
    ToolBusy { pending: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidToolArguments { tool: String, message: String },

    #[error("Tool result {0} does not match an outstanding request")]
    UnmatchedToolResult(String),

    #[error("Synthesis failure: {0}")]
    SynthesisFailure(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl Error {
    /// Only configuration problems terminate a session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Stable label used for metrics and event payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Error::RecognitionFailure(_) => "recognition_failure",
            Error::GenerationFailure(_) => "generation_failure",
            Error::ToolExecutionFailure { .. } => "tool_execution_failure",
            Error::UnknownTool(_) => "unknown_tool",
            Error::ToolBusy { .. } => "tool_busy",
            Error::InvalidToolArguments { .. } => "invalid_tool_arguments",
            Error::UnmatchedToolResult(_) => "unmatched_tool_result",
            Error::SynthesisFailure(_) => "synthesis_failure",
            Error::Configuration(_) => "configuration",
            Error::ChannelClosed(_) => "channel_closed",
        }
    }

    /// Tool rejections are surfaced the same way as handler failures
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            Error::ToolExecutionFailure { .. }
                | Error::UnknownTool(_)
                | Error::ToolBusy { .. }
                | Error::InvalidToolArguments { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
