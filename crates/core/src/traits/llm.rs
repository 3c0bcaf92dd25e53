//! Generation traits

use async_trait::async_trait;

use super::FragmentStream;
use crate::{GenerateRequest, Result, Turn};

/// Streaming generation engine
///
/// # Example
///
/// ```ignore
/// let engine: Arc<dyn GenerationEngine> = Arc::new(MyEngine::new(config));
/// let request = GenerateRequest::new().with_user_message("What's the weather?");
/// let mut fragments = engine.generate(request);
/// while let Some(fragment) = fragments.next().await { ... }
/// ```
pub trait GenerationEngine: Send + Sync + 'static {
    /// Stream fragments as they are generated
    ///
    /// Fragments are only produced while the stream is polled, so dropping
    /// it stops the engine.
    fn generate(&self, request: GenerateRequest) -> FragmentStream;

    /// Get model name for logging
    fn model_name(&self) -> &str;

    /// Estimate token count for text
    ///
    /// Uses a simple heuristic by default.
    fn estimate_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// Optional semantic end-of-turn model
#[async_trait]
pub trait EndOfTurnModel: Send + Sync + 'static {
    /// Probability (0.0 - 1.0) that the user has finished their turn
    async fn end_of_turn_probability(&self, history: &[Turn], transcript: &str) -> Result<f32>;
}
