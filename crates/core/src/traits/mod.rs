//! Collaborator traits
//!
//! Every engine the loop talks to sits behind one of these traits so
//! backends can be swapped and tests can script them.
//!
//! ```text
//! Speech:
//!   - RecognitionEngine: audio -> partial/final transcripts
//!   - VoiceActivityDetector: audio -> start/stop events
//!   - SynthesisEngine: text chunk -> audio frames
//!   - AudioSink: plays frames, can discard buffered audio
//!
//! Generation:
//!   - GenerationEngine: context -> text / tool-call fragments
//!   - EndOfTurnModel: optional end-of-turn probability
//! ```

mod llm;
mod speech;

use futures::Stream;
use std::pin::Pin;

pub use llm::{EndOfTurnModel, GenerationEngine};
pub use speech::{AudioSink, RecognitionEngine, RecognitionOptions, SynthesisEngine, VoiceActivityDetector};

/// Owned, sendable stream so it can move into spawned tasks
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

pub type RecognizerStream = BoxStream<crate::Result<crate::RecognizerOutput>>;
pub type VadStream = BoxStream<crate::VoiceActivity>;
pub type FragmentStream = BoxStream<crate::Result<crate::GenerationFragment>>;
pub type AudioStream = BoxStream<crate::Result<crate::AudioFrame>>;
