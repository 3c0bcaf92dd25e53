//! Runtime options for a voice agent

use std::time::Duration;
use voice_loop_config::{
    GenerationConfig, RecognitionConfig, Settings, SynthesisConfig,
};
use voice_loop_core::{Participant, RecognitionOptions};
use voice_loop_pipeline::TurnDetectionConfig;
use voice_loop_tools::CoordinatorConfig;

/// Settings resolved into the configs each stage takes
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub turn_detection: TurnDetectionConfig,
    /// End-of-turn model probability that confirms a pause
    pub end_of_turn_threshold: f32,
    pub recognition: RecognitionConfig,
    pub generation: GenerationConfig,
    pub synthesis: SynthesisConfig,
    pub tools: CoordinatorConfig,
    /// Default for generated replies
    pub allow_interruptions: bool,
    pub greeting: Option<String>,
    pub metrics_enabled: bool,
    /// Fixed filler choice, for reproducible sessions
    pub filler_seed: Option<u64>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl AgentOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            turn_detection: TurnDetectionConfig::from(&settings.endpointing),
            end_of_turn_threshold: settings.endpointing.end_of_turn_threshold,
            recognition: settings.recognition.clone(),
            generation: settings.generation.clone(),
            synthesis: settings.synthesis.clone(),
            tools: CoordinatorConfig::from(&settings.tools),
            allow_interruptions: settings.interruption.allow_interruptions,
            greeting: settings
                .interruption
                .greeting
                .clone()
                .filter(|g| !g.trim().is_empty()),
            metrics_enabled: settings.observability.metrics_enabled,
            filler_seed: None,
        }
    }

    pub fn with_endpointing(mut self, min: Duration, max: Duration) -> Self {
        self.turn_detection = TurnDetectionConfig::new(min, max);
        self
    }

    pub fn with_greeting(mut self, greeting: Option<String>) -> Self {
        self.greeting = greeting;
        self
    }

    pub fn with_filler_seed(mut self, seed: u64) -> Self {
        self.filler_seed = Some(seed);
        self
    }

    /// Recognizer model for this participant: telephony-tuned for SIP callers
    pub fn recognition_options(&self, participant: &Participant) -> RecognitionOptions {
        let model = if participant.is_telephony() {
            &self.recognition.telephony_model
        } else {
            &self.recognition.general_model
        };
        RecognitionOptions {
            model: model.clone(),
            language: self.recognition.language.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_settings() {
        let options = AgentOptions::default();
        assert_eq!(options.turn_detection.min_endpoint_delay, Duration::from_millis(500));
        assert_eq!(options.turn_detection.max_endpoint_delay, Duration::from_secs(5));
        assert_eq!(options.tools.filler_delay, Duration::from_millis(250));
        assert_eq!(options.tools.superseded_wait, Duration::from_secs(2));
        assert_eq!(
            options.greeting.as_deref(),
            Some("Hey, how can I help you today?")
        );
        assert!(options.allow_interruptions);
    }

    #[test]
    fn test_blank_greeting_is_dropped() {
        let mut settings = Settings::default();
        settings.interruption.greeting = Some("   ".to_string());
        assert_eq!(AgentOptions::from_settings(&settings).greeting, None);
    }

    #[test]
    fn test_model_per_participant_kind() {
        let options = AgentOptions::default();

        let web = options.recognition_options(&Participant::new("web-user"));
        assert_eq!(web.model, "nova-2-general");
        assert_eq!(web.language, "en");

        let phone = options.recognition_options(&Participant::sip("+15550100"));
        assert_eq!(phone.model, "nova-2-phonecall");
    }
}
