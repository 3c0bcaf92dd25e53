//! Usage aggregation
//!
//! Stage-completion events are folded into per-stage totals, forwarded to
//! the `metrics` facade, and summarized once at session teardown.

use serde::Serialize;
use std::time::Duration;

/// Stage-completion event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum UsageEvent {
    TranscriptFinal {
        characters: usize,
    },
    /// User stopped speaking until the turn was committed
    EndOfUtterance {
        silence: Duration,
        confirmed: bool,
    },
    GenerationComplete {
        time_to_first_fragment: Option<Duration>,
        duration: Duration,
        characters: usize,
        prompt_tokens: usize,
        completion_tokens: usize,
        tool_call: bool,
        cancelled: bool,
    },
    SynthesisComplete {
        characters: usize,
        audio_duration: Duration,
        time_to_first_audio: Option<Duration>,
        interrupted: bool,
    },
    ToolCallComplete {
        name: String,
        duration: Duration,
        success: bool,
    },
}

impl UsageEvent {
    pub fn stage(&self) -> &'static str {
        match self {
            UsageEvent::TranscriptFinal { .. } => "transcription",
            UsageEvent::EndOfUtterance { .. } => "end_of_utterance",
            UsageEvent::GenerationComplete { .. } => "generation",
            UsageEvent::SynthesisComplete { .. } => "synthesis",
            UsageEvent::ToolCallComplete { .. } => "tool",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscriptionUsage {
    pub finals: u64,
    pub characters: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndOfUtteranceUsage {
    pub turns: u64,
    pub confirmed: u64,
    pub total_silence: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationUsage {
    pub calls: u64,
    pub cancelled: u64,
    pub tool_calls: u64,
    pub characters: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_duration: Duration,
    /// Mean over calls that produced anything
    pub avg_time_to_first_fragment: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SynthesisUsage {
    pub utterances: u64,
    pub interrupted: u64,
    pub characters: u64,
    pub audio_duration: Duration,
    pub avg_time_to_first_audio: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolUsage {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration: Duration,
}

/// Immutable end-of-session summary
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    pub transcription: TranscriptionUsage,
    pub end_of_utterance: EndOfUtteranceUsage,
    pub generation: GenerationUsage,
    pub synthesis: SynthesisUsage,
    pub tools: ToolUsage,
}

#[derive(Debug, Default)]
struct LatencySamples {
    total: Duration,
    count: u32,
}

impl LatencySamples {
    fn record(&mut self, sample: Option<Duration>) {
        if let Some(sample) = sample {
            self.total += sample;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.total / self.count)
    }
}

#[derive(Debug, Default)]
pub struct UsageAggregator {
    summary: UsageSummary,
    first_fragment: LatencySamples,
    first_audio: LatencySamples,
    metrics_enabled: bool,
    frozen: bool,
}

impl UsageAggregator {
    pub fn new(metrics_enabled: bool) -> Self {
        Self {
            metrics_enabled,
            ..Default::default()
        }
    }

    /// Fold one event in; ignored once a snapshot has been taken
    pub fn collect(&mut self, event: &UsageEvent) -> bool {
        if self.frozen {
            tracing::warn!(stage = event.stage(), "Usage event after snapshot ignored");
            return false;
        }

        tracing::debug!(stage = event.stage(), ?event, "Usage collected");
        if self.metrics_enabled {
            record_metrics(event);
        }

        let summary = &mut self.summary;
        match event {
            UsageEvent::TranscriptFinal { characters } => {
                summary.transcription.finals += 1;
                summary.transcription.characters += *characters as u64;
            },
            UsageEvent::EndOfUtterance { silence, confirmed } => {
                let eou = &mut summary.end_of_utterance;
                eou.turns += 1;
                eou.confirmed += u64::from(*confirmed);
                eou.total_silence += *silence;
            },
            UsageEvent::GenerationComplete {
                time_to_first_fragment,
                duration,
                characters,
                prompt_tokens,
                completion_tokens,
                tool_call,
                cancelled,
            } => {
                let generation = &mut summary.generation;
                generation.calls += 1;
                generation.cancelled += u64::from(*cancelled);
                generation.tool_calls += u64::from(*tool_call);
                generation.characters += *characters as u64;
                generation.prompt_tokens += *prompt_tokens as u64;
                generation.completion_tokens += *completion_tokens as u64;
                generation.total_duration += *duration;
                self.first_fragment.record(*time_to_first_fragment);
            },
            UsageEvent::SynthesisComplete {
                characters,
                audio_duration,
                time_to_first_audio,
                interrupted,
            } => {
                let synthesis = &mut summary.synthesis;
                synthesis.utterances += 1;
                synthesis.interrupted += u64::from(*interrupted);
                synthesis.characters += *characters as u64;
                synthesis.audio_duration += *audio_duration;
                self.first_audio.record(*time_to_first_audio);
            },
            UsageEvent::ToolCallComplete {
                duration, success, ..
            } => {
                let tools = &mut summary.tools;
                tools.calls += 1;
                if *success {
                    tools.successes += 1;
                } else {
                    tools.failures += 1;
                }
                tools.total_duration += *duration;
            },
        }
        true
    }

    /// Freeze and summarize. Repeated calls return the same summary.
    pub fn snapshot(&mut self) -> UsageSummary {
        if !self.frozen {
            self.summary.generation.avg_time_to_first_fragment = self.first_fragment.mean();
            self.summary.synthesis.avg_time_to_first_audio = self.first_audio.mean();
            self.frozen = true;
        }
        self.summary.clone()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

fn record_metrics(event: &UsageEvent) {
    match event {
        UsageEvent::TranscriptFinal { characters } => {
            metrics::counter!("voice_loop_transcripts_total").increment(1);
            metrics::counter!("voice_loop_transcript_characters_total").increment(*characters as u64);
        },
        UsageEvent::EndOfUtterance { silence, .. } => {
            metrics::histogram!("voice_loop_end_of_utterance_seconds").record(silence.as_secs_f64());
        },
        UsageEvent::GenerationComplete {
            time_to_first_fragment,
            duration,
            completion_tokens,
            cancelled,
            ..
        } => {
            let outcome = if *cancelled { "cancelled" } else { "finished" };
            metrics::counter!("voice_loop_generations_total", "outcome" => outcome).increment(1);
            metrics::counter!("voice_loop_completion_tokens_total").increment(*completion_tokens as u64);
            metrics::histogram!("voice_loop_generation_seconds").record(duration.as_secs_f64());
            if let Some(ttft) = time_to_first_fragment {
                metrics::histogram!("voice_loop_generation_ttft_seconds").record(ttft.as_secs_f64());
            }
        },
        UsageEvent::SynthesisComplete {
            characters,
            audio_duration,
            time_to_first_audio,
            interrupted,
        } => {
            let outcome = if *interrupted { "interrupted" } else { "complete" };
            metrics::counter!("voice_loop_utterances_total", "outcome" => outcome).increment(1);
            metrics::counter!("voice_loop_synthesis_characters_total").increment(*characters as u64);
            metrics::histogram!("voice_loop_audio_seconds").record(audio_duration.as_secs_f64());
            if let Some(ttfa) = time_to_first_audio {
                metrics::histogram!("voice_loop_synthesis_ttfb_seconds").record(ttfa.as_secs_f64());
            }
        },
        UsageEvent::ToolCallComplete {
            name,
            duration,
            success,
        } => {
            let outcome = if *success { "success" } else { "failure" };
            metrics::counter!("voice_loop_tool_calls_total", "tool" => name.clone(), "outcome" => outcome)
                .increment(1);
            metrics::histogram!("voice_loop_tool_seconds", "tool" => name.clone())
                .record(duration.as_secs_f64());
        },
    }
}
