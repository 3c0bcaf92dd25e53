//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use voice_loop_core::VoiceConfig;

use crate::constants::{endpointing, generation, recognition, session, synthesis, tools};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub endpointing: EndpointingConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub interruption: InterruptionConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Silence bounds for turn detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointingConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Probability at or above which the end-of-turn model confirms a turn end
    #[serde(default = "default_end_of_turn_threshold")]
    pub end_of_turn_threshold: f32,
}

fn default_min_delay_ms() -> u64 {
    endpointing::MIN_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    endpointing::MAX_DELAY_MS
}

fn default_end_of_turn_threshold() -> f32 {
    endpointing::END_OF_TURN_THRESHOLD
}

impl Default for EndpointingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            end_of_turn_threshold: default_end_of_turn_threshold(),
        }
    }
}

impl EndpointingConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Recognizer model selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default = "default_general_model")]
    pub general_model: String,

    /// Model for participants dialing in over SIP
    #[serde(default = "default_telephony_model")]
    pub telephony_model: String,

    #[serde(default = "default_language")]
    pub language: String,
}

fn default_general_model() -> String {
    recognition::GENERAL_MODEL.to_string()
}

fn default_telephony_model() -> String {
    recognition::TELEPHONY_MODEL.to_string()
}

fn default_language() -> String {
    recognition::LANGUAGE.to_string()
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            general_model: default_general_model(),
            telephony_model: default_telephony_model(),
            language: default_language(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Spoken when generation fails; `None` stays silent
    #[serde(default = "default_fallback_message")]
    pub fallback_message: Option<String>,
}

fn default_temperature() -> f32 {
    generation::TEMPERATURE
}

fn default_system_prompt() -> String {
    generation::SYSTEM_PROMPT.to_string()
}

fn default_fallback_message() -> Option<String> {
    Some(generation::FALLBACK_MESSAGE.to_string())
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: None,
            system_prompt: default_system_prompt(),
            fallback_message: default_fallback_message(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Character thresholds for successive chunks of one utterance
    #[serde(default = "default_chunk_schedule")]
    pub chunk_length_schedule: Vec<usize>,
}

fn default_chunk_schedule() -> Vec<usize> {
    synthesis::CHUNK_LENGTH_SCHEDULE.to_vec()
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            voice: VoiceConfig::default(),
            chunk_length_schedule: default_chunk_schedule(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default handler timeout; tools may override
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_true")]
    pub filler_enabled: bool,

    #[serde(default = "default_filler_delay_ms")]
    pub filler_delay_ms: u64,

    /// Longest a reply to a new question waits for a superseded call
    #[serde(default = "default_superseded_wait_ms")]
    pub superseded_wait_ms: u64,

    /// Record the spoken filler as an assistant turn
    #[serde(default = "default_true")]
    pub filler_in_context: bool,

    #[serde(default = "default_weather_base_url")]
    pub weather_base_url: String,
}

fn default_tool_timeout_secs() -> u64 {
    tools::TIMEOUT_SECS
}

fn default_filler_delay_ms() -> u64 {
    tools::FILLER_DELAY_MS
}

fn default_superseded_wait_ms() -> u64 {
    tools::SUPERSEDED_WAIT_MS
}

fn default_weather_base_url() -> String {
    tools::WEATHER_BASE_URL.to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
            filler_enabled: true,
            filler_delay_ms: default_filler_delay_ms(),
            superseded_wait_ms: default_superseded_wait_ms(),
            filler_in_context: true,
            weather_base_url: default_weather_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptionConfig {
    /// Whether generated replies can be barged in on
    #[serde(default = "default_true")]
    pub allow_interruptions: bool,

    /// Spoken right after the session starts
    #[serde(default = "default_greeting")]
    pub greeting: Option<String>,
}

fn default_greeting() -> Option<String> {
    Some(session::GREETING.to_string())
}

impl Default for InterruptionConfig {
    fn default() -> Self {
        Self {
            allow_interruptions: true,
            greeting: default_greeting(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Forward usage to the `metrics` recorder
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_endpointing()?;
        self.validate_generation()?;
        self.validate_synthesis()?;
        self.validate_tools()?;
        Ok(())
    }

    fn validate_endpointing(&self) -> Result<(), ConfigError> {
        let ep = &self.endpointing;

        if ep.min_delay_ms > ep.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "endpointing.min_delay_ms".to_string(),
                message: format!(
                    "Must not exceed max_delay_ms ({} > {})",
                    ep.min_delay_ms, ep.max_delay_ms
                ),
            });
        }

        if ep.max_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "endpointing.max_delay_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&ep.end_of_turn_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "endpointing.end_of_turn_threshold".to_string(),
                message: format!(
                    "Must be between 0.0 and 1.0, got {}",
                    ep.end_of_turn_threshold
                ),
            });
        }

        Ok(())
    }

    fn validate_generation(&self) -> Result<(), ConfigError> {
        let temperature = self.generation.temperature;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue {
                field: "generation.temperature".to_string(),
                message: format!("Must be between 0.0 and 2.0, got {}", temperature),
            });
        }

        if self.generation.max_tokens == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "generation.max_tokens".to_string(),
                message: "Must be at least 1 when set".to_string(),
            });
        }

        Ok(())
    }

    fn validate_synthesis(&self) -> Result<(), ConfigError> {
        let schedule = &self.synthesis.chunk_length_schedule;

        if schedule.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "synthesis.chunk_length_schedule".to_string(),
                message: "Must contain at least one threshold".to_string(),
            });
        }

        if schedule.contains(&0) {
            return Err(ConfigError::InvalidValue {
                field: "synthesis.chunk_length_schedule".to_string(),
                message: "Thresholds must be positive".to_string(),
            });
        }

        if !schedule.windows(2).all(|w| w[0] < w[1]) {
            return Err(ConfigError::InvalidValue {
                field: "synthesis.chunk_length_schedule".to_string(),
                message: format!("Must be strictly increasing, got {:?}", schedule),
            });
        }

        if self.synthesis.voice.voice_id.trim().is_empty() {
            return Err(ConfigError::MissingField("synthesis.voice.voice_id".to_string()));
        }

        Ok(())
    }

    fn validate_tools(&self) -> Result<(), ConfigError> {
        if self.tools.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tools.timeout_secs".to_string(),
                message: "Timeout must be at least 1 second".to_string(),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    builder = builder.add_source(File::with_name("config/default").required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("VOICE_LOOP")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.endpointing.min_delay(), Duration::from_millis(500));
        assert_eq!(settings.endpointing.max_delay(), Duration::from_secs(5));
        assert_eq!(settings.generation.temperature, 0.8);
        assert_eq!(settings.recognition.telephony_model, "nova-2-phonecall");
        assert_eq!(settings.synthesis.chunk_length_schedule, vec![80, 120, 200, 260]);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        settings.endpointing.min_delay_ms = 6000;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "endpointing.min_delay_ms"
        ));

        let mut settings = Settings::default();
        settings.generation.temperature = 2.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.synthesis.chunk_length_schedule = vec![120, 80];
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.synthesis.chunk_length_schedule.clear();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.tools.timeout_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [endpointing]
            min_delay_ms = 300

            [generation]
            temperature = 0.4
            fallback_message = "One moment, please."
            "#,
        )
        .unwrap();

        assert_eq!(settings.endpointing.min_delay_ms, 300);
        assert_eq!(settings.endpointing.max_delay_ms, 5000);
        assert_eq!(settings.generation.temperature, 0.4);
        assert_eq!(
            settings.generation.fallback_message.as_deref(),
            Some("One moment, please.")
        );
        assert!(settings.tools.filler_enabled);
    }

    #[test]
    fn test_yaml_voice_section() {
        let settings: Settings = serde_yaml::from_str(
            "synthesis:\n  voice:\n    voice_id: abc123\n    stability: 0.3\n",
        )
        .unwrap();
        assert_eq!(settings.synthesis.voice.voice_id, "abc123");
        assert_eq!(settings.synthesis.voice.stability, 0.3);
        assert_eq!(settings.synthesis.voice.name, "Bella");
    }

    #[test]
    fn test_load_settings_from_environment() {
        std::env::set_var("VOICE_LOOP__GENERATION__MAX_TOKENS", "77");
        let settings = load_settings(Some("does-not-exist")).unwrap();
        std::env::remove_var("VOICE_LOOP__GENERATION__MAX_TOKENS");

        assert_eq!(settings.generation.max_tokens, Some(77));
        assert_eq!(settings.endpointing.max_delay_ms, 5000);
    }
}
