//! Synthesis output controller
//!
//! Turns a stream of text fragments into played audio, one chunk at a
//! time, and stops at the next await point once cancelled.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use voice_loop_core::{AudioSink, SynthesisEngine, VoiceConfig};

use super::chunker::TextChunker;
use crate::PipelineError;

/// Progress reported while a speech plays
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisProgress {
    /// First frame handed to the sink
    PlaybackStarted { latency: Duration },
    /// A chunk finished playing
    ChunkPlayed { text: String, duration: Duration },
}

/// What actually happened to one utterance
#[derive(Debug, Clone, Default)]
pub struct SynthesisOutcome {
    /// Text whose audio fully played
    pub spoken_text: String,
    /// Everything received for this utterance
    pub intended_text: String,
    /// Audio handed to the sink and played, including a cut-off chunk
    pub played_duration: Duration,
    pub chunks_played: usize,
    pub interrupted: bool,
    pub error: Option<PipelineError>,
    pub first_audio_latency: Option<Duration>,
    /// Wall time from first text to last played frame
    pub elapsed: Duration,
}

impl SynthesisOutcome {
    /// Played to the end without interruption or error
    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.error.is_none()
    }

    pub fn started_playback(&self) -> bool {
        self.first_audio_latency.is_some()
    }
}

enum ChunkPlayback {
    Complete(Duration),
    Cancelled(Duration),
    Failed(PipelineError, Duration),
}

#[derive(Clone)]
pub struct SynthesisController {
    engine: Arc<dyn SynthesisEngine>,
    sink: Arc<dyn AudioSink>,
    voice: VoiceConfig,
    schedule: Vec<usize>,
}

impl SynthesisController {
    pub fn new(
        engine: Arc<dyn SynthesisEngine>,
        sink: Arc<dyn AudioSink>,
        voice: VoiceConfig,
        schedule: Vec<usize>,
    ) -> Self {
        Self {
            engine,
            sink,
            voice,
            schedule,
        }
    }

    pub fn voice(&self) -> &VoiceConfig {
        &self.voice
    }

    /// Speak text arriving on `text_rx` until the sender is dropped.
    ///
    /// On cancellation the sink is cleared and the outcome reports only
    /// the chunks that finished playing as spoken.
    pub async fn speak<F>(
        &self,
        mut text_rx: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
        mut on_progress: F,
    ) -> SynthesisOutcome
    where
        F: FnMut(SynthesisProgress) + Send,
    {
        let started = Instant::now();
        let mut chunker = TextChunker::new(self.schedule.clone());
        let mut pending = std::collections::VecDeque::new();
        let mut input_done = false;
        let mut spoken = Vec::new();
        let mut sequence = 0u64;
        let mut outcome = SynthesisOutcome::default();

        loop {
            if pending.is_empty() && !input_done {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        outcome.interrupted = true;
                        break;
                    }
                    fragment = text_rx.recv() => match fragment {
                        Some(fragment) => {
                            outcome.intended_text.push_str(&fragment);
                            pending.extend(chunker.push(&fragment));
                        },
                        None => {
                            input_done = true;
                            pending.extend(chunker.finish());
                        },
                    },
                }
                continue;
            }

            let Some(chunk) = pending.pop_front() else {
                break;
            };

            let playback = self
                .play_chunk(&chunk, &cancel, &mut sequence, started, &mut outcome, &mut on_progress)
                .await;

            match playback {
                ChunkPlayback::Complete(duration) => {
                    outcome.played_duration += duration;
                    outcome.chunks_played += 1;
                    on_progress(SynthesisProgress::ChunkPlayed {
                        text: chunk.clone(),
                        duration,
                    });
                    spoken.push(chunk);
                },
                ChunkPlayback::Cancelled(duration) => {
                    outcome.played_duration += duration;
                    outcome.interrupted = true;
                    break;
                },
                ChunkPlayback::Failed(err, duration) => {
                    tracing::warn!(error = %err, chunk = %chunk, "Synthesis chunk failed");
                    outcome.played_duration += duration;
                    outcome.error = Some(err);
                    break;
                },
            }
        }

        if outcome.interrupted {
            self.sink.clear();
        }

        outcome.spoken_text = if outcome.is_complete() {
            outcome.intended_text.trim().to_string()
        } else {
            spoken.join(" ")
        };
        outcome.elapsed = started.elapsed();

        tracing::debug!(
            chunks = outcome.chunks_played,
            interrupted = outcome.interrupted,
            played_ms = outcome.played_duration.as_millis() as u64,
            "Speech finished"
        );

        outcome
    }

    async fn play_chunk<F>(
        &self,
        chunk: &str,
        cancel: &CancellationToken,
        sequence: &mut u64,
        started: Instant,
        outcome: &mut SynthesisOutcome,
        on_progress: &mut F,
    ) -> ChunkPlayback
    where
        F: FnMut(SynthesisProgress) + Send,
    {
        let mut frames = self.engine.synthesize(chunk, &self.voice);
        let mut played = Duration::ZERO;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return ChunkPlayback::Cancelled(played),
                next = frames.next() => next,
            };

            let frame = match next {
                None => return ChunkPlayback::Complete(played),
                Some(Err(e)) => {
                    return ChunkPlayback::Failed(PipelineError::Synthesis(e.to_string()), played)
                },
                Some(Ok(frame)) => frame.with_sequence(*sequence),
            };
            *sequence += 1;

            if outcome.first_audio_latency.is_none() {
                let latency = started.elapsed();
                outcome.first_audio_latency = Some(latency);
                on_progress(SynthesisProgress::PlaybackStarted { latency });
            }

            let duration = frame.duration();
            tokio::select! {
                biased;
                () = cancel.cancelled() => return ChunkPlayback::Cancelled(played),
                result = self.sink.play(frame) => {
                    if let Err(e) = result {
                        return ChunkPlayback::Failed(PipelineError::Playback(e.to_string()), played);
                    }
                    played += duration;
                },
            }
        }
    }
}
