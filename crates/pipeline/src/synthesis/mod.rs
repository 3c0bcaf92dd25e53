//! Streaming synthesis output

mod chunker;
mod controller;

pub use chunker::TextChunker;
pub use controller::{SynthesisController, SynthesisOutcome, SynthesisProgress};
