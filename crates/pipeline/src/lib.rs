//! Speech-side pipeline stages
//!
//! Features:
//! - Transcript normalization with monotonic session timestamps
//! - Endpointing state machine with min/max silence bounds and
//!   optional end-of-turn model confirmation
//! - Barge-in detection while the agent is generating or speaking
//! - Sentence/clause chunking of streamed text on a length schedule
//! - Cancellable synthesis playout that reports the spoken prefix

pub mod clock;
pub mod synthesis;
pub mod transcript;
pub mod turn_detection;

pub use clock::SessionClock;
pub use synthesis::{
    SynthesisController, SynthesisOutcome, SynthesisProgress, TextChunker,
};
pub use transcript::TranscriptAdapter;
pub use turn_detection::{TurnDetectionConfig, TurnDetector, TurnState};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<PipelineError> for voice_loop_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Recognition(msg) => voice_loop_core::Error::RecognitionFailure(msg),
            PipelineError::Synthesis(msg) | PipelineError::Playback(msg) => {
                voice_loop_core::Error::SynthesisFailure(msg)
            },
            PipelineError::Config(msg) => voice_loop_core::Error::Configuration(msg),
            PipelineError::ChannelClosed => {
                voice_loop_core::Error::ChannelClosed("pipeline".to_string())
            },
        }
    }
}
