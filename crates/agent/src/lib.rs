//! Voice agent session loop
//!
//! Features:
//! - One event loop per session owning history, state, and usage
//! - Endpointing with optional end-of-turn model confirmation
//! - Barge-in that cancels generation and playback mid-utterance
//! - Single outstanding tool call with a speculative spoken filler
//! - Speech queue with per-speech interruption policy and handles
//! - Per-kind event subscribers and a session usage summary

pub mod agent;
pub mod events;
pub mod options;
mod orchestrator;
pub mod speech;
pub mod telemetry;
pub mod usage;

pub use agent::{AgentHandle, VoiceAgent, VoiceAgentBuilder};
pub use events::{AgentEvent, AgentEventKind, EventCallback, EventEmitter};
pub use options::AgentOptions;
pub use speech::{SayOptions, SpeechHandle, SpeechSource};
pub use usage::{UsageAggregator, UsageEvent, UsageSummary};

use thiserror::Error;
use voice_loop_config::ConfigError;
use voice_loop_llm::LlmError;
use voice_loop_pipeline::PipelineError;
use voice_loop_tools::ToolError;

/// Agent errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Session closed")]
    SessionClosed,
}

impl From<ConfigError> for AgentError {
    fn from(err: ConfigError) -> Self {
        AgentError::Configuration(err.to_string())
    }
}

impl From<AgentError> for voice_loop_core::Error {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Configuration(msg) => voice_loop_core::Error::Configuration(msg),
            AgentError::Pipeline(e) => e.into(),
            AgentError::Llm(e) => e.into(),
            AgentError::Tool(e) => e.into(),
            AgentError::SessionClosed => voice_loop_core::Error::ChannelClosed("session".to_string()),
        }
    }
}
