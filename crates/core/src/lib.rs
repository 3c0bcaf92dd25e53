//! Core traits and types for the voice loop
//!
//! This crate provides foundational types used across all other crates:
//! - Conversation history, turns, and tool-call payloads
//! - Pipeline events (voice activity, transcripts, turn signals, state)
//! - Collaborator traits for recognition, generation, synthesis, and playback
//! - The error taxonomy every stage reports through

pub mod audio;
pub mod conversation;
pub mod error;
pub mod events;
pub mod llm_types;
pub mod participant;
pub mod traits;
pub mod voice_config;

pub use audio::AudioFrame;
pub use conversation::{
    ContextHistory, ToolCallRequest, ToolCallResult, ToolOutcome, Turn, TurnRole,
};
pub use error::{Error, Result};
pub use events::{
    PipelineState, RecognizerOutput, TranscriptChunk, TurnSignal, VoiceActivity,
    VoiceActivityKind,
};
pub use llm_types::{GenerateRequest, GenerationFragment, Message, Role, ToolDefinition};
pub use participant::{Participant, ParticipantKind};
pub use voice_config::VoiceConfig;

pub use traits::{
    AudioSink, AudioStream, BoxStream, EndOfTurnModel, FragmentStream, GenerationEngine,
    RecognitionEngine, RecognitionOptions, RecognizerStream, SynthesisEngine, VadStream,
    VoiceActivityDetector,
};
