//! Default values for every tunable in the loop
//!
//! Settings defaults, builder defaults, and tests all read from here.

/// Endpointing (silence-based turn detection)
pub mod endpointing {
    /// Shortest silence after which a turn may end (ms)
    pub const MIN_DELAY_MS: u64 = 500;

    /// Silence after which a turn always ends (ms)
    pub const MAX_DELAY_MS: u64 = 5000;

    /// End-of-turn model probability that counts as confirmation
    pub const END_OF_TURN_THRESHOLD: f32 = 0.5;
}

/// Speech recognition
pub mod recognition {
    pub const GENERAL_MODEL: &str = "nova-2-general";

    /// Used for SIP participants
    pub const TELEPHONY_MODEL: &str = "nova-2-phonecall";

    pub const LANGUAGE: &str = "en";
}

/// Response generation
pub mod generation {
    pub const TEMPERATURE: f32 = 0.8;

    pub const SYSTEM_PROMPT: &str = "You are a friendly voice assistant. \
        Keep answers short and conversational, and avoid markup or lists since \
        everything you say is spoken aloud.";

    pub const FALLBACK_MESSAGE: &str = "Sorry, I ran into a problem. Could you say that again?";
}

/// Speech synthesis
pub mod synthesis {
    /// Buffered-character thresholds for successive chunks; the last repeats
    pub const CHUNK_LENGTH_SCHEDULE: [usize; 4] = [80, 120, 200, 260];
}

/// Tool execution
pub mod tools {
    pub const TIMEOUT_SECS: u64 = 30;

    /// Wait before a filler may start; a tool that finishes sooner gets none
    pub const FILLER_DELAY_MS: u64 = 250;

    /// How long a new question waits on a call it superseded
    pub const SUPERSEDED_WAIT_MS: u64 = 2000;

    pub const WEATHER_BASE_URL: &str = "https://wttr.in";
}

/// Session behavior
pub mod session {
    pub const GREETING: &str = "Hey, how can I help you today?";

    /// Capacity of the per-session command channel
    pub const COMMAND_BUFFER: usize = 64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpointing_bounds_are_ordered() {
        assert!(endpointing::MIN_DELAY_MS <= endpointing::MAX_DELAY_MS);
    }

    #[test]
    fn test_chunk_schedule_is_increasing() {
        let schedule = synthesis::CHUNK_LENGTH_SCHEDULE;
        assert!(schedule.windows(2).all(|w| w[0] < w[1]));
    }
}
