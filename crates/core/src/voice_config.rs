//! Voice configuration handed to the synthesis engine

use serde::{Deserialize, Serialize};

/// Voice configuration for synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Engine-side voice identifier
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    /// Human-readable voice name
    #[serde(default = "default_voice_name")]
    pub name: String,
    /// Synthesis model
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Voice stability (0.0 - 1.0)
    #[serde(default = "default_stability")]
    pub stability: f32,
    /// Similarity boost (0.0 - 1.0)
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
    /// Style exaggeration (0.0 - 1.0)
    #[serde(default)]
    pub style: f32,
    #[serde(default = "default_true")]
    pub use_speaker_boost: bool,
    /// Latency optimization level (0 - 4, higher is faster)
    #[serde(default = "default_streaming_latency")]
    pub streaming_latency: u8,
}

fn default_voice_id() -> String {
    "k2intd1ORm0YUH8etnXg".to_string()
}

fn default_voice_name() -> String {
    "Bella".to_string()
}

fn default_model() -> String {
    "eleven_turbo_v2_5".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_stability() -> f32 {
    0.71
}

fn default_similarity_boost() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_streaming_latency() -> u8 {
    3
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: default_voice_id(),
            name: default_voice_name(),
            model: default_model(),
            language: default_language(),
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            style: 0.0,
            use_speaker_boost: true,
            streaming_latency: default_streaming_latency(),
        }
    }
}

impl VoiceConfig {
    /// Create a config for the given voice
    pub fn new(voice_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            voice_id: voice_id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_stability(mut self, stability: f32) -> Self {
        self.stability = stability.clamp(0.0, 1.0);
        self
    }

    pub fn with_similarity_boost(mut self, similarity_boost: f32) -> Self {
        self.similarity_boost = similarity_boost.clamp(0.0, 1.0);
        self
    }

    pub fn with_style(mut self, style: f32) -> Self {
        self.style = style.clamp(0.0, 1.0);
        self
    }

    pub fn with_streaming_latency(mut self, level: u8) -> Self {
        self.streaming_latency = level.min(4);
        self
    }
}
