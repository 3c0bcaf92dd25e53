//! Speech processing traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AudioStream, RecognizerStream, VadStream};
use crate::{AudioFrame, Result, VoiceConfig};

/// Per-session recognizer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOptions {
    /// Model variant, e.g. a telephony-tuned model for SIP callers
    pub model: String,
    pub language: String,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            model: "nova-2-general".to_string(),
            language: "en".to_string(),
        }
    }
}

/// Streaming speech recognizer
///
/// Implementations connect to an engine and yield partial transcripts
/// followed by a final transcript for each utterance.
#[async_trait]
pub trait RecognitionEngine: Send + Sync + 'static {
    /// Open a recognition stream for one session
    async fn connect(&self, options: &RecognitionOptions) -> Result<RecognizerStream>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

/// Voice-activity detector
pub trait VoiceActivityDetector: Send + Sync + 'static {
    /// Start/stop events for the session's inbound audio
    fn events(&self) -> VadStream;
}

/// Streaming text-to-speech
pub trait SynthesisEngine: Send + Sync + 'static {
    /// Synthesize one chunk of text
    ///
    /// The returned stream is dropped on interruption, which must abort
    /// any in-flight engine request.
    fn synthesize(&self, text: &str, voice: &VoiceConfig) -> AudioStream;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

/// Audio output
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    /// Play a frame; resolves once the frame has been played out
    async fn play(&self, frame: AudioFrame) -> Result<()>;

    /// Discard any audio buffered but not yet played
    fn clear(&self);
}
