//! Configuration management for the voice loop
//!
//! Supports loading configuration from:
//! - `config/default.{toml,yaml,json}`
//! - `config/{env}.{toml,yaml,json}`
//! - Environment variables (`VOICE_LOOP__` prefix, `__` between sections)
//!
//! Every field has a default, so an empty source set yields a working
//! configuration that matches the values in [`constants`].

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, EndpointingConfig, GenerationConfig, InterruptionConfig, ObservabilityConfig,
    RecognitionConfig, RuntimeEnvironment, Settings, SynthesisConfig, ToolsConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => ConfigError::MissingField(key),
            other => ConfigError::ParseError(other.to_string()),
        }
    }
}

impl From<ConfigError> for voice_loop_core::Error {
    fn from(err: ConfigError) -> Self {
        voice_loop_core::Error::Configuration(err.to_string())
    }
}
