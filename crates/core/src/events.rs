//! Pipeline events
//!
//! All timestamps are session-relative offsets from the session clock.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceActivityKind {
    Start,
    Stop,
}

/// Voice-activity detector output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceActivity {
    pub kind: VoiceActivityKind,
    pub timestamp: Duration,
}

impl VoiceActivity {
    pub fn start(timestamp: Duration) -> Self {
        Self {
            kind: VoiceActivityKind::Start,
            timestamp,
        }
    }

    pub fn stop(timestamp: Duration) -> Self {
        Self {
            kind: VoiceActivityKind::Stop,
            timestamp,
        }
    }

    pub fn is_start(&self) -> bool {
        self.kind == VoiceActivityKind::Start
    }
}

/// Raw recognizer output, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizerOutput {
    pub text: String,
    pub is_final: bool,
    /// Engine-reported offset, when it has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl RecognizerOutput {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            timestamp: None,
            confidence: None,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            is_final: true,
            ..Self::partial(text)
        }
    }

    pub fn at(mut self, timestamp: Duration) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Normalized transcript event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub text: String,
    pub is_final: bool,
    pub timestamp: Duration,
}

/// Coarse state of a session's pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Idle,
    ListeningToUser,
    Generating,
    AwaitingTool,
    Speaking,
}

impl PipelineState {
    /// States in which user speech counts as barge-in
    pub fn is_agent_active(&self) -> bool {
        matches!(self, PipelineState::Generating | PipelineState::Speaking)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::ListeningToUser => "listening_to_user",
            PipelineState::Generating => "generating",
            PipelineState::AwaitingTool => "awaiting_tool",
            PipelineState::Speaking => "speaking",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of the turn detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TurnSignal {
    UserTurnStarted {
        at: Duration,
    },
    UserTurnEnded {
        /// Accumulated final transcript, possibly empty
        transcript: String,
        at: Duration,
        /// Silence between the last voice activity and the decision
        silence: Duration,
        /// Whether an end-of-turn model confirmed the decision
        confirmed: bool,
    },
    Interruption {
        at: Duration,
    },
}

impl TurnSignal {
    pub fn name(&self) -> &'static str {
        match self {
            TurnSignal::UserTurnStarted { .. } => "user_turn_started",
            TurnSignal::UserTurnEnded { .. } => "user_turn_ended",
            TurnSignal::Interruption { .. } => "interruption",
        }
    }
}
