//! Response generator driver
//!
//! Streams a generation for the current context as [`GenerationEvent`]s.
//! Text is forwarded as soon as it arrives. The first tool call ends the
//! generation: the engine stream is dropped and no further fragments are
//! requested.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use voice_loop_core::{
    BoxStream, GenerationEngine, GenerationFragment, Result as CoreResult, ToolCallRequest, Turn,
};

use crate::prompt::{estimate_tokens, PromptBuilder};
use crate::tool_call::ToolCallScanner;
use crate::LlmError;

/// Event from one generation
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    /// Speakable text, in emission order
    Text(String),
    /// Tool requested; the generation is over
    ToolCall(ToolCallRequest),
    Finished(GenerationStats),
    /// Cancelled before completion. Nothing from this generation belongs
    /// in history.
    Cancelled(GenerationStats),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationStats {
    pub time_to_first_fragment: Option<Duration>,
    pub duration: Duration,
    pub fragments: usize,
    /// Characters of speakable text
    pub characters: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub tool_call: bool,
    pub cancelled: bool,
}

enum Step {
    Cancelled,
    Next(Option<CoreResult<GenerationFragment>>),
}

#[derive(Clone)]
pub struct ResponseGenerator {
    engine: Arc<dyn GenerationEngine>,
    prompt: PromptBuilder,
}

impl ResponseGenerator {
    pub fn new(engine: Arc<dyn GenerationEngine>, prompt: PromptBuilder) -> Self {
        Self { engine, prompt }
    }

    pub fn model_name(&self) -> &str {
        self.engine.model_name()
    }

    /// Start a generation over a snapshot of the history.
    ///
    /// The stream ends after `Finished`, `Cancelled`, or an error.
    pub fn generate(
        &self,
        history: &[Turn],
        cancel: CancellationToken,
    ) -> BoxStream<Result<GenerationEvent, LlmError>> {
        let request = self.prompt.build(history);
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum();
        let engine = self.engine.clone();

        Box::pin(async_stream::stream! {
            let started = Instant::now();
            let mut stats = GenerationStats {
                prompt_tokens,
                ..Default::default()
            };
            let mut text = String::new();
            let mut scanner = ToolCallScanner::new();

            if cancel.is_cancelled() {
                stats.cancelled = true;
                yield Ok(GenerationEvent::Cancelled(stats));
                return;
            }

            let mut fragments = engine.generate(request);

            loop {
                let step = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Step::Cancelled,
                    next = fragments.next() => Step::Next(next),
                };

                let items = match step {
                    Step::Cancelled => {
                        stats.cancelled = true;
                        stats.duration = started.elapsed();
                        stats.completion_tokens = estimate_tokens(&text);
                        tracing::debug!(fragments = stats.fragments, "Generation cancelled");
                        yield Ok(GenerationEvent::Cancelled(stats));
                        return;
                    },
                    Step::Next(None) => match scanner.finish() {
                        Ok(rest) => {
                            if let Some(GenerationFragment::Text(tail)) = rest {
                                text.push_str(&tail);
                                stats.characters += tail.chars().count();
                                yield Ok(GenerationEvent::Text(tail));
                            }
                            stats.duration = started.elapsed();
                            stats.completion_tokens = estimate_tokens(&text);
                            yield Ok(GenerationEvent::Finished(stats));
                            return;
                        },
                        Err(e) => {
                            yield Err(e);
                            return;
                        },
                    },
                    Step::Next(Some(Err(e))) => {
                        tracing::warn!(error = %e, "Generation engine failed");
                        yield Err(LlmError::GenerationFailed(e.to_string()));
                        return;
                    },
                    Step::Next(Some(Ok(fragment))) => {
                        stats.fragments += 1;
                        if stats.time_to_first_fragment.is_none() {
                            stats.time_to_first_fragment = Some(started.elapsed());
                        }
                        match fragment {
                            GenerationFragment::Text(delta) => match scanner.push(&delta) {
                                Ok(items) => items,
                                Err(e) => {
                                    yield Err(e);
                                    return;
                                },
                            },
                            GenerationFragment::ToolCall(request) => {
                                let mut items: Vec<_> = scanner.flush_text().into_iter().collect();
                                items.push(GenerationFragment::ToolCall(request));
                                items
                            },
                        }
                    },
                };

                for item in items {
                    match item {
                        GenerationFragment::Text(delta) => {
                            text.push_str(&delta);
                            stats.characters += delta.chars().count();
                            yield Ok(GenerationEvent::Text(delta));
                        },
                        GenerationFragment::ToolCall(request) => {
                            tracing::debug!(tool = %request.name, call_id = %request.id, "Tool call detected");
                            stats.tool_call = true;
                            stats.duration = started.elapsed();
                            stats.completion_tokens = estimate_tokens(&text);
                            yield Ok(GenerationEvent::ToolCall(request));
                            yield Ok(GenerationEvent::Finished(stats));
                            return;
                        },
                    }
                }
            }
        })
    }
}
