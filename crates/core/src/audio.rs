//! Audio frame type exchanged between synthesis and playback

use std::sync::Arc;
use std::time::Duration;

/// Mono f32 PCM frame
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Shared so frames can be fanned out without copying
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    /// Play order within one speech, assigned by the output controller
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            sequence: 0,
        }
    }

    /// Silent frame of the given length
    pub fn silence(duration: Duration, sample_rate: u32) -> Self {
        let len = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
        Self::new(vec![0.0f32; len], sample_rate)
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.samples.len() as u128 * 1_000_000_000 / self.sample_rate as u128;
        Duration::from_nanos(nanos as u64)
    }
}
