//! Turn detection
//!
//! Silence-bounded endpointing with optional end-of-turn model
//! confirmation, plus barge-in detection.

mod detector;

pub use detector::{TurnDetector, TurnState};

use std::time::Duration;
use voice_loop_config::EndpointingConfig;

/// Configuration for endpointing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnDetectionConfig {
    /// Shortest silence after which a turn may end
    pub min_endpoint_delay: Duration,
    /// Silence after which a turn always ends
    pub max_endpoint_delay: Duration,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        use voice_loop_config::constants::endpointing::{MAX_DELAY_MS, MIN_DELAY_MS};

        Self {
            min_endpoint_delay: Duration::from_millis(MIN_DELAY_MS),
            max_endpoint_delay: Duration::from_millis(MAX_DELAY_MS),
        }
    }
}

impl TurnDetectionConfig {
    /// Bounds are reordered if given backwards
    pub fn new(min_endpoint_delay: Duration, max_endpoint_delay: Duration) -> Self {
        Self {
            min_endpoint_delay: min_endpoint_delay.min(max_endpoint_delay),
            max_endpoint_delay: max_endpoint_delay.max(min_endpoint_delay),
        }
    }
}

impl From<&EndpointingConfig> for TurnDetectionConfig {
    fn from(config: &EndpointingConfig) -> Self {
        Self::new(config.min_delay(), config.max_delay())
    }
}
