//! Endpointing state machine
//!
//! Pure over session timestamps: the owner feeds events, sleeps until
//! [`TurnDetector::next_deadline`], then calls [`TurnDetector::poll`].

use std::time::Duration;
use voice_loop_core::{TranscriptChunk, TurnSignal, VoiceActivity, VoiceActivityKind};

use super::TurnDetectionConfig;

/// Turn detection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    /// Waiting for user to speak
    #[default]
    Idle,
    /// User is speaking
    UserSpeaking,
    /// User went silent, endpoint timer running
    Evaluating,
}

/// Internal state for tracking
#[derive(Debug, Default)]
struct InternalState {
    state: TurnState,
    silence_start: Option<Duration>,
    /// Set once an end-of-turn model confirmed the current silence
    confirmed_at: Option<Duration>,
    /// Finals of the current turn
    transcript: String,
    /// Latest partial, replaced on every update
    interim: String,
    /// Silence of a turn that ended before any words arrived; a final that
    /// lands while idle is committed as that turn
    late_final_silence: Option<Duration>,
}

#[derive(Debug)]
pub struct TurnDetector {
    config: TurnDetectionConfig,
    internal: InternalState,
    /// Bumped whenever the silence timer starts or is cancelled
    epoch: u64,
}

impl TurnDetector {
    pub fn new(config: TurnDetectionConfig) -> Self {
        Self {
            config,
            internal: InternalState::default(),
            epoch: 0,
        }
    }

    pub fn config(&self) -> &TurnDetectionConfig {
        &self.config
    }

    /// Process a voice-activity event.
    ///
    /// `agent_active` is true while the pipeline is generating or speaking;
    /// speech starting then is an interruption regardless of endpointing.
    pub fn on_voice_activity(&mut self, event: VoiceActivity, agent_active: bool) -> Vec<TurnSignal> {
        let at = event.timestamp;
        let mut signals = Vec::new();

        if event.is_start() && agent_active {
            signals.push(TurnSignal::Interruption { at });
        }

        let internal = &mut self.internal;
        let new_state = match (internal.state, event.kind) {
            (TurnState::Idle, VoiceActivityKind::Start) => {
                internal.transcript.clear();
                internal.interim.clear();
                internal.late_final_silence = None;
                signals.push(TurnSignal::UserTurnStarted { at });
                TurnState::UserSpeaking
            },

            // User was only pausing
            (TurnState::Evaluating, VoiceActivityKind::Start) => {
                internal.silence_start = None;
                internal.confirmed_at = None;
                self.epoch += 1;
                TurnState::UserSpeaking
            },

            (TurnState::UserSpeaking, VoiceActivityKind::Stop) => {
                internal.silence_start = Some(at);
                internal.confirmed_at = None;
                self.epoch += 1;
                TurnState::Evaluating
            },

            (state, _) => state,
        };

        if new_state != internal.state {
            tracing::trace!(from = ?internal.state, to = ?new_state, ?at, "Turn state change");
        }
        internal.state = new_state;
        signals
    }

    /// Record a transcript update.
    ///
    /// While idle, a final belongs to a turn that already ended. It is
    /// returned as its own `UserTurnEnded` when that turn ended without
    /// words, and dropped otherwise.
    pub fn on_transcript(&mut self, chunk: &TranscriptChunk) -> Option<TurnSignal> {
        let internal = &mut self.internal;
        if internal.state == TurnState::Idle {
            if !chunk.is_final || chunk.text.trim().is_empty() {
                return None;
            }
            let Some(silence) = internal.late_final_silence.take() else {
                tracing::debug!(text = %chunk.text, "Late final dropped");
                return None;
            };
            tracing::debug!(text = %chunk.text, "Late final committed as its own turn");
            return Some(TurnSignal::UserTurnEnded {
                transcript: chunk.text.clone(),
                at: chunk.timestamp,
                silence,
                confirmed: false,
            });
        }

        if chunk.is_final {
            if !internal.transcript.is_empty() {
                internal.transcript.push(' ');
            }
            internal.transcript.push_str(&chunk.text);
            internal.interim.clear();
        } else {
            internal.interim = chunk.text.clone();
        }
        None
    }

    /// Apply an end-of-turn model confirmation.
    ///
    /// Confirmations carry the epoch they were requested in; one from an
    /// earlier epoch (the user resumed speaking since) is ignored.
    pub fn confirm_end_of_turn(&mut self, epoch: u64, at: Duration) -> bool {
        if epoch != self.epoch || self.internal.state != TurnState::Evaluating {
            return false;
        }
        self.internal.confirmed_at = Some(at);
        true
    }

    /// Emit `UserTurnEnded` if a bound has been reached.
    ///
    /// Fires at most once per silence: at `min_endpoint_delay` or later when
    /// confirmed, and unconditionally at `max_endpoint_delay`.
    pub fn poll(&mut self, now: Duration) -> Option<TurnSignal> {
        if self.internal.state != TurnState::Evaluating {
            return None;
        }
        let silence_start = self.internal.silence_start?;
        let silence = now.saturating_sub(silence_start);
        let confirmed = self.internal.confirmed_at.is_some();

        let ended = silence >= self.config.max_endpoint_delay
            || (confirmed && silence >= self.config.min_endpoint_delay);
        if !ended {
            return None;
        }

        let transcript = self.take_transcript();
        self.internal.state = TurnState::Idle;
        self.internal.silence_start = None;
        self.internal.confirmed_at = None;
        self.internal.late_final_silence = transcript.trim().is_empty().then_some(silence);
        self.epoch += 1;

        tracing::debug!(?silence, confirmed, chars = transcript.len(), "User turn ended");

        Some(TurnSignal::UserTurnEnded {
            transcript,
            at: now,
            silence,
            confirmed,
        })
    }

    /// Session offset at which [`poll`](Self::poll) will next fire
    pub fn next_deadline(&self) -> Option<Duration> {
        if self.internal.state != TurnState::Evaluating {
            return None;
        }
        let start = self.internal.silence_start?;
        let wait = if self.internal.confirmed_at.is_some() {
            self.config.min_endpoint_delay
        } else {
            self.config.max_endpoint_delay
        };
        Some(start + wait)
    }

    fn take_transcript(&mut self) -> String {
        let internal = &mut self.internal;
        let mut text = std::mem::take(&mut internal.transcript);
        let interim = std::mem::take(&mut internal.interim);
        // A partial never finalized still counts
        if text.is_empty() {
            text = interim;
        }
        text
    }

    /// Transcript so far, for the end-of-turn model
    pub fn current_transcript(&self) -> String {
        let internal = &self.internal;
        match (internal.transcript.is_empty(), internal.interim.is_empty()) {
            (false, false) => format!("{} {}", internal.transcript, internal.interim),
            (false, true) => internal.transcript.clone(),
            _ => internal.interim.clone(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> TurnState {
        self.internal.state
    }

    /// Reset turn detector state, dropping any partial turn
    pub fn reset(&mut self) {
        self.internal = InternalState::default();
        self.epoch += 1;
    }
}

impl Default for TurnDetector {
    fn default() -> Self {
        Self::new(TurnDetectionConfig::default())
    }
}
