//! Transcript stream adapter
//!
//! Normalizes raw recognizer output into [`TranscriptChunk`]s: trimmed
//! text, no empty or repeated partials, and timestamps that never go
//! backwards.

use futures::StreamExt;
use std::time::Duration;
use voice_loop_core::{BoxStream, RecognizerOutput, RecognizerStream, TranscriptChunk};

use crate::clock::SessionClock;
use crate::PipelineError;

#[derive(Debug, Default)]
pub struct TranscriptAdapter {
    last_timestamp: Duration,
    last_partial: Option<String>,
}

impl TranscriptAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one recognizer output.
    ///
    /// `now` stamps outputs the engine did not timestamp. Returns `None`
    /// for outputs that carry nothing new.
    pub fn normalize(&mut self, output: RecognizerOutput, now: Duration) -> Option<TranscriptChunk> {
        let text = output.text.trim();

        if output.is_final {
            self.last_partial = None;
            if text.is_empty() {
                return None;
            }
        } else {
            if text.is_empty() || self.last_partial.as_deref() == Some(text) {
                return None;
            }
            self.last_partial = Some(text.to_string());
        }

        let timestamp = output.timestamp.unwrap_or(now).max(self.last_timestamp);
        self.last_timestamp = timestamp;

        Some(TranscriptChunk {
            text: text.to_string(),
            is_final: output.is_final,
            timestamp,
        })
    }

    /// Forget the in-progress partial (turn abandoned)
    pub fn reset(&mut self) {
        self.last_partial = None;
    }

    /// Wrap a recognizer stream.
    ///
    /// Engine errors become [`PipelineError::Recognition`]; the stream keeps
    /// going so a transient failure only costs the current turn.
    pub fn adapt(
        mut self,
        mut raw: RecognizerStream,
        clock: SessionClock,
    ) -> BoxStream<Result<TranscriptChunk, PipelineError>> {
        Box::pin(async_stream::stream! {
            while let Some(item) = raw.next().await {
                match item {
                    Ok(output) => {
                        if let Some(chunk) = self.normalize(output, clock.now()) {
                            yield Ok(chunk);
                        }
                    },
                    Err(e) => {
                        self.reset();
                        yield Err(PipelineError::Recognition(e.to_string()));
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_loop_core::Error;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_drops_empty_and_repeated_partials() {
        let mut adapter = TranscriptAdapter::new();

        assert!(adapter.normalize(RecognizerOutput::partial("   "), ms(10)).is_none());
        assert!(adapter.normalize(RecognizerOutput::partial(" what's "), ms(20)).is_some());
        assert!(adapter.normalize(RecognizerOutput::partial("what's"), ms(30)).is_none());

        let chunk = adapter
            .normalize(RecognizerOutput::partial("what's the"), ms(40))
            .unwrap();
        assert_eq!(chunk.text, "what's the");
        assert!(!chunk.is_final);
    }

    #[test]
    fn test_final_resets_partial_tracking() {
        let mut adapter = TranscriptAdapter::new();
        adapter.normalize(RecognizerOutput::partial("hello"), ms(10));

        let chunk = adapter
            .normalize(RecognizerOutput::final_text("hello"), ms(20))
            .unwrap();
        assert!(chunk.is_final);

        // Same text starts a new utterance
        assert!(adapter.normalize(RecognizerOutput::partial("hello"), ms(30)).is_some());
        assert!(adapter.normalize(RecognizerOutput::final_text(""), ms(40)).is_none());
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let mut adapter = TranscriptAdapter::new();

        let a = adapter
            .normalize(RecognizerOutput::partial("a").at(ms(500)), ms(100))
            .unwrap();
        assert_eq!(a.timestamp, ms(500));

        let b = adapter
            .normalize(RecognizerOutput::partial("a b").at(ms(200)), ms(600))
            .unwrap();
        assert_eq!(b.timestamp, ms(500));

        let c = adapter.normalize(RecognizerOutput::partial("a b c"), ms(700)).unwrap();
        assert_eq!(c.timestamp, ms(700));
    }

    #[tokio::test]
    async fn test_adapt_maps_engine_errors() {
        let raw: RecognizerStream = Box::pin(futures::stream::iter(vec![
            Ok(RecognizerOutput::partial("hi")),
            Err(Error::RecognitionFailure("socket closed".into())),
            Ok(RecognizerOutput::final_text("hi there")),
        ]));

        let items: Vec<_> = TranscriptAdapter::new()
            .adapt(raw, SessionClock::start())
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        assert!(matches!(items[1], Err(PipelineError::Recognition(_))));
        assert_eq!(items[2].as_ref().unwrap().text, "hi there");
    }
}
