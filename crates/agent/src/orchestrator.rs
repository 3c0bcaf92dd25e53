//! Session loop
//!
//! One task owns the session: history, pipeline state, turn detector, tool
//! coordinator, usage, and the speech queue. Spawned work (generation
//! streams, synthesis playout, tool handlers, filler timers, end-of-turn
//! predictions) reports back over an unbounded internal channel and never
//! touches session state directly.

use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use voice_loop_core::{
    BoxStream, ContextHistory, EndOfTurnModel, Error, Participant, PipelineState,
    ToolCallRequest, ToolCallResult, ToolOutcome, TranscriptChunk, Turn, TurnSignal, VadStream,
    VoiceActivity,
};
use voice_loop_llm::{GenerationEvent, GenerationStats, LlmError, ResponseGenerator};
use voice_loop_pipeline::{
    PipelineError, SessionClock, SynthesisController, SynthesisOutcome, SynthesisProgress,
    TurnDetector, TurnState,
};
use voice_loop_tools::{FillerPlan, ToolContext, ToolCoordinator, ToolError};

use crate::events::{AgentEvent, EventEmitter};
use crate::options::AgentOptions;
use crate::speech::{SayOptions, Speech, SpeechHandle, SpeechSource};
use crate::usage::{UsageAggregator, UsageEvent, UsageSummary};

pub(crate) type TranscriptStream = BoxStream<Result<TranscriptChunk, PipelineError>>;

/// Requests from [`AgentHandle`](crate::AgentHandle)
pub(crate) enum Command {
    Say {
        text: String,
        options: SayOptions,
        reply: oneshot::Sender<SpeechHandle>,
    },
    History {
        reply: oneshot::Sender<Vec<Turn>>,
    },
    Shutdown {
        reply: oneshot::Sender<UsageSummary>,
    },
}

/// Reports from spawned tasks
enum Internal {
    Generation {
        generation_id: u64,
        event: Result<GenerationEvent, LlmError>,
    },
    Synthesis {
        speech_id: String,
        progress: SynthesisProgress,
    },
    SpeechDone {
        speech_id: String,
        outcome: SynthesisOutcome,
    },
    ToolFinished(ToolCallResult),
    FillerDue(FillerPlan),
    SupersededWaitElapsed(String),
    EndOfTurn {
        epoch: u64,
        probability: voice_loop_core::Result<f32>,
    },
}

enum LoopEvent {
    Command(Command),
    CommandsClosed,
    Internal(Internal),
    InterruptSpeech(String),
    Vad(Option<VoiceActivity>),
    Transcript(Option<Result<TranscriptChunk, PipelineError>>),
    Deadline,
}

struct ActiveGeneration {
    id: u64,
    cancel: CancellationToken,
    speech_id: String,
    /// Text emitted before any tool call
    text: String,
}

/// The session's one tool call, from request until its result is in history
struct ToolInFlight {
    request: ToolCallRequest,
    /// False when rejected before dispatch; the result is then synthetic
    dispatched: bool,
    result: Option<ToolCallResult>,
    /// Reply that requested the call, until its turn is committed
    reply_speech: Option<String>,
    filler_speech: Option<String>,
    /// Spoken filler, committed after the result
    filler_turn: Option<(String, Turn)>,
    suppressed: bool,
    /// A superseding question may be answered before the result lands
    reply_released: bool,
}

impl ToolInFlight {
    fn settled(&self) -> bool {
        self.result.is_some() && self.reply_speech.is_none() && self.filler_speech.is_none()
    }
}

/// Everything a session is built from
pub(crate) struct SessionParts {
    pub session_id: String,
    pub participant: Participant,
    pub options: AgentOptions,
    pub clock: SessionClock,
    pub generator: ResponseGenerator,
    pub synthesis: SynthesisController,
    pub coordinator: ToolCoordinator,
    pub end_of_turn: Option<Arc<dyn EndOfTurnModel>>,
    pub emitter: Arc<EventEmitter>,
    pub state_tx: watch::Sender<PipelineState>,
    pub interrupt_tx: mpsc::UnboundedSender<String>,
}

pub(crate) struct Session {
    id: String,
    participant: Participant,
    options: AgentOptions,
    clock: SessionClock,
    history: ContextHistory,
    state: PipelineState,
    state_tx: watch::Sender<PipelineState>,
    detector: TurnDetector,
    generator: ResponseGenerator,
    synthesis: SynthesisController,
    coordinator: ToolCoordinator,
    end_of_turn: Option<Arc<dyn EndOfTurnModel>>,
    usage: UsageAggregator,
    emitter: Arc<EventEmitter>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    interrupt_tx: mpsc::UnboundedSender<String>,
    current: Option<Speech>,
    queue: VecDeque<Speech>,
    generation: Option<ActiveGeneration>,
    tool: Option<ToolInFlight>,
    /// A reply is owed once the running generation and tool call settle
    reply_requested: bool,
    next_generation_id: u64,
    next_speech_id: u64,
}

impl Session {
    /// Returns the session and the receiving end of its internal channel
    fn new(parts: SessionParts) -> (Self, mpsc::UnboundedReceiver<Internal>) {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let history = ContextHistory::with_system_prompt(parts.options.generation.system_prompt.clone());
        let session = Self {
            id: parts.session_id,
            participant: parts.participant,
            detector: TurnDetector::new(parts.options.turn_detection),
            usage: UsageAggregator::new(parts.options.metrics_enabled),
            options: parts.options,
            clock: parts.clock,
            history,
            state: PipelineState::Idle,
            state_tx: parts.state_tx,
            generator: parts.generator,
            synthesis: parts.synthesis,
            coordinator: parts.coordinator,
            end_of_turn: parts.end_of_turn,
            emitter: parts.emitter,
            internal_tx,
            interrupt_tx: parts.interrupt_tx,
            current: None,
            queue: VecDeque::new(),
            generation: None,
            tool: None,
            reply_requested: false,
            next_generation_id: 0,
            next_speech_id: 0,
        };
        (session, internal_rx)
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    pub(crate) async fn run(
        parts: SessionParts,
        mut commands: mpsc::Receiver<Command>,
        mut interrupts: mpsc::UnboundedReceiver<String>,
        vad: VadStream,
        transcripts: TranscriptStream,
    ) {
        let (mut session, mut internal_rx) = Session::new(parts);
        let mut vad = Some(vad);
        let mut transcripts = Some(transcripts);

        session.update_state();
        if let Some(greeting) = session.options.greeting.clone() {
            session.say(&greeting, SayOptions::new());
            session.update_state();
        }

        loop {
            let deadline = session
                .detector
                .next_deadline()
                .map(|at| session.clock.instant_at(at));

            let event = tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => LoopEvent::Command(command),
                    None => LoopEvent::CommandsClosed,
                },
                Some(internal) = internal_rx.recv() => LoopEvent::Internal(internal),
                Some(speech_id) = interrupts.recv() => LoopEvent::InterruptSpeech(speech_id),
                activity = next_or_pending(&mut vad) => LoopEvent::Vad(activity),
                chunk = next_or_pending(&mut transcripts) => LoopEvent::Transcript(chunk),
                () = sleep_until_deadline(deadline) => LoopEvent::Deadline,
            };

            match event {
                LoopEvent::Command(Command::Shutdown { reply }) => {
                    let summary = session.teardown();
                    let _ = reply.send(summary);
                    break;
                },
                LoopEvent::CommandsClosed => {
                    session.teardown();
                    break;
                },
                LoopEvent::Command(command) => session.on_command(command),
                LoopEvent::Internal(internal) => session.on_internal(internal),
                LoopEvent::InterruptSpeech(speech_id) => session.interrupt_speech(&speech_id),
                LoopEvent::Vad(Some(activity)) => session.on_voice_activity(activity),
                LoopEvent::Vad(None) => {
                    tracing::debug!(session_id = %session.id, "Voice activity stream ended");
                    vad = None;
                },
                LoopEvent::Transcript(Some(chunk)) => session.on_transcript(chunk),
                LoopEvent::Transcript(None) => {
                    tracing::debug!(session_id = %session.id, "Transcript stream ended");
                    transcripts = None;
                },
                LoopEvent::Deadline => {
                    if let Some(signal) = session.detector.poll(session.clock.now()) {
                        session.on_turn_signal(signal);
                    }
                },
            }

            session.update_state();
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Say { text, options, reply } => {
                let handle = self.say(&text, options);
                let _ = reply.send(handle);
            },
            Command::History { reply } => {
                let _ = reply.send(self.history.turns().to_vec());
            },
            // Handled by the loop, which stops after it
            Command::Shutdown { .. } => {},
        }
    }

    fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Generation { generation_id, event } => self.on_generation(generation_id, event),
            Internal::Synthesis { speech_id, progress } => self.on_synthesis_progress(&speech_id, progress),
            Internal::SpeechDone { speech_id, outcome } => self.on_speech_done(&speech_id, outcome),
            Internal::ToolFinished(result) => self.on_tool_finished(result),
            Internal::FillerDue(plan) => self.on_filler_due(plan),
            Internal::SupersededWaitElapsed(call_id) => self.on_superseded_wait_elapsed(&call_id),
            Internal::EndOfTurn { epoch, probability } => self.on_end_of_turn(epoch, probability),
        }
    }

    // =========================================================================
    // Pipeline State
    // =========================================================================

    fn derive_state(&self) -> PipelineState {
        match &self.current {
            Some(speech) if speech.started_playback || speech.source != SpeechSource::Reply => {
                return PipelineState::Speaking;
            },
            Some(_) => return PipelineState::Generating,
            None => {},
        }
        if self.generation.is_some() {
            PipelineState::Generating
        } else if self.tool.as_ref().is_some_and(|t| !t.reply_released) {
            PipelineState::AwaitingTool
        } else {
            PipelineState::ListeningToUser
        }
    }

    fn update_state(&mut self) {
        let state = self.derive_state();
        self.set_state(state);
    }

    fn set_state(&mut self, new: PipelineState) {
        let old = self.state;
        if old == new {
            return;
        }
        tracing::debug!(session_id = %self.id, from = %old, to = %new, "Pipeline state change");
        self.state = new;
        self.state_tx.send_replace(new);
        self.emit(AgentEvent::StateChanged { old, new });
    }

    fn emit(&self, event: AgentEvent) {
        self.emitter.emit(&event);
    }

    fn report_error(&self, error: Error) {
        tracing::warn!(session_id = %self.id, kind = error.kind(), error = %error, "Recovered failure");
        self.emit(AgentEvent::Error(error));
    }

    fn record(&mut self, event: UsageEvent) {
        if self.usage.collect(&event) {
            self.emit(AgentEvent::MetricsCollected(event));
        }
    }

    // =========================================================================
    // User Input
    // =========================================================================

    fn on_voice_activity(&mut self, activity: VoiceActivity) {
        // Restamped so every detector input shares the session clock
        let activity = VoiceActivity {
            timestamp: self.clock.now(),
            ..activity
        };
        let at = activity.timestamp;

        if activity.is_start() {
            self.emit(AgentEvent::UserStartedSpeaking { at });
        } else {
            self.emit(AgentEvent::UserStoppedSpeaking { at });
        }

        let agent_active = self.derive_state().is_agent_active();
        for signal in self.detector.on_voice_activity(activity, agent_active) {
            self.on_turn_signal(signal);
        }

        if !activity.is_start() {
            self.request_end_of_turn();
        }
    }

    fn on_transcript(&mut self, chunk: Result<TranscriptChunk, PipelineError>) {
        match chunk {
            Ok(chunk) => {
                let late_turn = self.detector.on_transcript(&chunk);
                if chunk.is_final {
                    tracing::debug!(session_id = %self.id, text = %chunk.text, "Final transcript");
                    self.record(UsageEvent::TranscriptFinal {
                        characters: chunk.text.chars().count(),
                    });
                }
                match late_turn {
                    Some(signal) => self.on_turn_signal(signal),
                    None if chunk.is_final => self.request_end_of_turn(),
                    None => {},
                }
            },
            Err(e) => {
                // The turn in progress is abandoned
                self.detector.reset();
                self.report_error(e.into());
            },
        }
    }

    fn request_end_of_turn(&self) {
        let Some(model) = self.end_of_turn.clone() else {
            return;
        };
        if self.detector.state() != TurnState::Evaluating {
            return;
        }
        let transcript = self.detector.current_transcript();
        if transcript.trim().is_empty() {
            return;
        }

        let epoch = self.detector.epoch();
        let history = self.history.turns().to_vec();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let probability = model.end_of_turn_probability(&history, &transcript).await;
            let _ = tx.send(Internal::EndOfTurn { epoch, probability });
        });
    }

    fn on_end_of_turn(&mut self, epoch: u64, probability: voice_loop_core::Result<f32>) {
        match probability {
            Ok(p) if p >= self.options.end_of_turn_threshold => {
                if self.detector.confirm_end_of_turn(epoch, self.clock.now()) {
                    tracing::debug!(session_id = %self.id, probability = p, "End of turn confirmed");
                }
            },
            Ok(p) => {
                tracing::trace!(session_id = %self.id, probability = p, "End of turn not confirmed");
            },
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "End-of-turn model failed");
            },
        }
    }

    fn on_turn_signal(&mut self, signal: TurnSignal) {
        match signal {
            TurnSignal::UserTurnStarted { at } => {
                tracing::debug!(session_id = %self.id, ?at, "User turn started");
            },
            TurnSignal::Interruption { at } => self.on_interruption(at),
            TurnSignal::UserTurnEnded {
                transcript,
                silence,
                confirmed,
                ..
            } => {
                self.record(UsageEvent::EndOfUtterance { silence, confirmed });
                self.commit_user_turn(transcript);
            },
        }
    }

    fn commit_user_turn(&mut self, transcript: String) {
        let text = transcript.trim().to_string();
        if text.is_empty() {
            tracing::debug!(session_id = %self.id, "Empty user turn dropped");
            return;
        }

        tracing::info!(session_id = %self.id, text = %text, "User turn committed");
        self.history.push(Turn::user(text.clone()));
        self.emit(AgentEvent::UserSpeechCommitted { text });

        // A new question supersedes the answer to a pending call
        self.suppress_tool();
        self.bound_superseded_wait();
        self.reply_requested = true;
        self.maybe_start_reply();
    }

    // =========================================================================
    // Interruption
    // =========================================================================

    fn on_interruption(&mut self, at: Duration) {
        let interruptible = match (&self.current, &self.generation) {
            (Some(speech), _) => speech.allow_interruptions,
            (None, Some(_)) => self.options.allow_interruptions,
            (None, None) => return,
        };
        if !interruptible {
            tracing::debug!(session_id = %self.id, ?at, "Interruption ignored by current speech");
            return;
        }

        tracing::info!(session_id = %self.id, ?at, "User interrupted the agent");
        self.emit(AgentEvent::Interruption { at });

        if let Some(speech) = &self.current {
            speech.cancel.cancel();
        }
        if let Some(generation) = self.generation.take() {
            generation.cancel.cancel();
        }

        let queued = std::mem::take(&mut self.queue);
        for speech in queued {
            if speech.allow_interruptions {
                speech.cancel.cancel();
                self.retire_speech(speech, None);
            } else {
                self.queue.push_back(speech);
            }
        }

        self.suppress_tool();
        self.reply_requested = false;
    }

    fn interrupt_speech(&mut self, speech_id: &str) {
        if let Some(speech) = self.current.as_ref().filter(|s| s.id == speech_id) {
            tracing::debug!(session_id = %self.id, speech_id, "Speech interrupted by handle");
            speech.cancel.cancel();
            self.cancel_generation_for(speech_id);
            return;
        }

        if let Some(pos) = self.queue.iter().position(|s| s.id == speech_id) {
            if let Some(speech) = self.queue.remove(pos) {
                speech.cancel.cancel();
                self.cancel_generation_for(speech_id);
                self.retire_speech(speech, None);
            }
        }
    }

    fn cancel_generation_for(&mut self, speech_id: &str) {
        if self.generation.as_ref().is_some_and(|g| g.speech_id == speech_id) {
            if let Some(generation) = self.generation.take() {
                generation.cancel.cancel();
            }
        }
    }

    // =========================================================================
    // Speech Queue
    // =========================================================================

    fn next_speech_id(&mut self) -> String {
        self.next_speech_id += 1;
        format!("speech_{}", self.next_speech_id)
    }

    fn say(&mut self, text: &str, options: SayOptions) -> SpeechHandle {
        let id = self.next_speech_id();
        let (speech, done) = Speech::new(id.clone(), SpeechSource::Say, options);
        let handle = SpeechHandle::new(id, options.allow_interruptions, done, self.interrupt_tx.clone());
        self.enqueue(speech.with_text(text));
        handle
    }

    fn enqueue(&mut self, speech: Speech) {
        tracing::debug!(
            session_id = %self.id,
            speech_id = %speech.id,
            source = speech.source.as_str(),
            queued = self.current.is_some(),
            "Speech scheduled"
        );
        if self.current.is_none() {
            self.play(speech);
        } else {
            self.queue.push_back(speech);
        }
    }

    fn play(&mut self, mut speech: Speech) {
        let Some(text_rx) = speech.text_rx.take() else {
            self.retire_speech(speech, None);
            return;
        };

        let controller = self.synthesis.clone();
        let cancel = speech.cancel.clone();
        let speech_id = speech.id.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let progress_tx = tx.clone();
            let progress_id = speech_id.clone();
            let outcome = controller
                .speak(text_rx, cancel, move |progress| {
                    let _ = progress_tx.send(Internal::Synthesis {
                        speech_id: progress_id.clone(),
                        progress,
                    });
                })
                .await;
            let _ = tx.send(Internal::SpeechDone { speech_id, outcome });
        });

        self.current = Some(speech);
    }

    fn play_next(&mut self) {
        if self.current.is_none() {
            if let Some(next) = self.queue.pop_front() {
                self.play(next);
            }
        }
    }

    fn find_speech_mut(&mut self, speech_id: &str) -> Option<&mut Speech> {
        if let Some(current) = self.current.as_mut().filter(|s| s.id == speech_id) {
            return Some(current);
        }
        self.queue.iter_mut().find(|s| s.id == speech_id)
    }

    fn on_synthesis_progress(&mut self, speech_id: &str, progress: SynthesisProgress) {
        match progress {
            SynthesisProgress::PlaybackStarted { latency } => {
                let Some(speech) = self.current.as_mut().filter(|s| s.id == speech_id) else {
                    return;
                };
                speech.started_playback = true;
                tracing::debug!(
                    session_id = %self.id,
                    speech_id,
                    latency_ms = latency.as_millis() as u64,
                    "Agent started speaking"
                );
                self.emit(AgentEvent::AgentStartedSpeaking {
                    speech_id: speech_id.to_string(),
                });
            },
            SynthesisProgress::ChunkPlayed { text, duration } => {
                tracing::trace!(speech_id, chunk = %text, ?duration, "Chunk played");
            },
        }
    }

    fn on_speech_done(&mut self, speech_id: &str, outcome: SynthesisOutcome) {
        if !self.current.as_ref().is_some_and(|s| s.id == speech_id) {
            tracing::trace!(speech_id, "Outcome for a speech no longer playing");
            return;
        }
        let Some(speech) = self.current.take() else {
            return;
        };

        if outcome.started_playback() || !outcome.intended_text.trim().is_empty() {
            self.record(UsageEvent::SynthesisComplete {
                characters: outcome.spoken_text.chars().count(),
                audio_duration: outcome.played_duration,
                time_to_first_audio: outcome.first_audio_latency,
                interrupted: outcome.interrupted,
            });
        }
        if speech.started_playback {
            self.emit(AgentEvent::AgentStoppedSpeaking {
                speech_id: speech.id.clone(),
                interrupted: outcome.interrupted,
            });
        }
        if let Some(err) = outcome.error.clone() {
            self.report_error(err.into());
        }

        self.retire_speech(speech, Some(&outcome));
        self.play_next();
    }

    /// Commit what a finished or dropped speech contributed to history
    fn retire_speech(&mut self, speech: Speech, outcome: Option<&SynthesisOutcome>) {
        let spoken = outcome.map(|o| o.spoken_text.trim().to_string()).unwrap_or_default();
        let truncated = outcome
            .map(|o| !o.is_complete() && !o.intended_text.trim().is_empty())
            .unwrap_or(false);

        match speech.source {
            SpeechSource::Reply => {
                if let Some(request) = speech.tool_call.clone() {
                    let turn = Turn::assistant_tool_call(spoken, request).with_interrupted(truncated);
                    self.commit_assistant(&speech.id, turn);
                    if let Some(tool) = self.tool.as_mut() {
                        if tool.reply_speech.as_deref() == Some(speech.id.as_str()) {
                            tool.reply_speech = None;
                        }
                    }
                    self.try_finish_tool();
                } else if speech.add_to_history && !spoken.is_empty() {
                    self.commit_assistant(&speech.id, Turn::assistant(spoken).with_interrupted(truncated));
                }
            },
            SpeechSource::Filler => {
                if let Some(tool) = self.tool.as_mut() {
                    if tool.filler_speech.as_deref() == Some(speech.id.as_str()) {
                        tool.filler_speech = None;
                        if speech.add_to_history && !spoken.is_empty() {
                            let turn = Turn::assistant(spoken).with_interrupted(truncated);
                            tool.filler_turn = Some((speech.id.clone(), turn));
                        }
                    }
                }
                self.try_finish_tool();
            },
            SpeechSource::Say => {
                if speech.add_to_history && !spoken.is_empty() {
                    self.commit_assistant(&speech.id, Turn::assistant(spoken).with_interrupted(truncated));
                }
            },
        }

        speech.finish();
    }

    fn commit_assistant(&mut self, speech_id: &str, turn: Turn) {
        let text = turn.text.clone();
        let interrupted = turn.interrupted;
        tracing::info!(
            session_id = %self.id,
            speech_id,
            interrupted,
            tool_call = turn.tool_call.is_some(),
            text = %text,
            "Agent turn committed"
        );
        self.history.push(turn);

        if text.is_empty() {
            return;
        }
        let speech_id = speech_id.to_string();
        if interrupted {
            self.emit(AgentEvent::AgentSpeechInterrupted {
                speech_id,
                spoken_text: text,
            });
        } else {
            self.emit(AgentEvent::AgentSpeechCommitted { speech_id, text });
        }
    }

    // =========================================================================
    // Generation
    // =========================================================================

    fn maybe_start_reply(&mut self) {
        let tool_settled = self.tool.as_ref().map_or(true, |t| t.reply_released);
        if self.reply_requested && self.generation.is_none() && tool_settled {
            self.reply_requested = false;
            self.start_reply();
        }
    }

    fn start_reply(&mut self) {
        self.next_generation_id += 1;
        let generation_id = self.next_generation_id;
        let cancel = CancellationToken::new();

        let speech_id = self.next_speech_id();
        let options = SayOptions::new()
            .allow_interruptions(self.options.allow_interruptions)
            .add_to_history(true);
        let (speech, _done) = Speech::new(speech_id.clone(), SpeechSource::Reply, options);

        tracing::debug!(
            session_id = %self.id,
            generation_id,
            speech_id = %speech_id,
            model = self.generator.model_name(),
            "Starting reply generation"
        );

        let mut events = self.generator.generate(self.history.turns(), cancel.clone());
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if tx.send(Internal::Generation { generation_id, event }).is_err() {
                    break;
                }
            }
        });

        self.generation = Some(ActiveGeneration {
            id: generation_id,
            cancel,
            speech_id,
            text: String::new(),
        });
        self.enqueue(speech);
    }

    fn on_generation(&mut self, generation_id: u64, event: Result<GenerationEvent, LlmError>) {
        // Stale generations still count toward usage
        match &event {
            Ok(GenerationEvent::Finished(stats)) | Ok(GenerationEvent::Cancelled(stats)) => {
                self.record(generation_usage(stats));
            },
            _ => {},
        }

        let Some(generation) = self.generation.as_mut().filter(|g| g.id == generation_id) else {
            return;
        };
        let speech_id = generation.speech_id.clone();

        match event {
            Ok(GenerationEvent::Text(text)) => {
                generation.text.push_str(&text);
                if let Some(speech) = self.find_speech_mut(&speech_id) {
                    speech.push_text(text);
                }
            },
            Ok(GenerationEvent::ToolCall(request)) => {
                let pre_text = generation.text.clone();
                if let Some(speech) = self.find_speech_mut(&speech_id) {
                    speech.close_text();
                }
                self.on_tool_call(request, &speech_id, &pre_text);
            },
            Ok(GenerationEvent::Finished(_)) | Ok(GenerationEvent::Cancelled(_)) => {
                if let Some(speech) = self.find_speech_mut(&speech_id) {
                    speech.close_text();
                }
                self.generation = None;
                self.maybe_start_reply();
            },
            Err(e) => {
                self.generation = None;
                self.abandon_reply(&speech_id);
                self.report_error(e.into());
                if let Some(message) = self.options.generation.fallback_message.clone() {
                    self.say(&message, SayOptions::new().add_to_history(false));
                }
                self.maybe_start_reply();
            },
        }
    }

    /// Failed generation: nothing of the reply is kept
    fn abandon_reply(&mut self, speech_id: &str) {
        if let Some(speech) = self.find_speech_mut(speech_id) {
            speech.add_to_history = false;
            speech.close_text();
            speech.cancel.cancel();
        }
        if let Some(pos) = self.queue.iter().position(|s| s.id == speech_id) {
            if let Some(speech) = self.queue.remove(pos) {
                self.retire_speech(speech, None);
            }
        }
    }

    // =========================================================================
    // Tool Calls
    // =========================================================================

    fn on_tool_call(&mut self, request: ToolCallRequest, speech_id: &str, pre_text: &str) {
        // Only reachable once a superseded call stopped holding replies back
        if let Some(pending) = self.tool.as_ref() {
            self.report_error(
                ToolError::Busy {
                    pending: pending.request.id.clone(),
                }
                .into(),
            );
            return;
        }

        let filler_eligible =
            pre_text.trim().is_empty() && !self.history.ends_with_assistant_utterance();
        let ctx = ToolContext::new(&self.id, &self.participant.identity, &request.id);

        match self.coordinator.dispatch(request.clone(), ctx, filler_eligible) {
            Ok(dispatch) => {
                self.emit(AgentEvent::FunctionCallsStarted {
                    request: request.clone(),
                });

                let tx = self.internal_tx.clone();
                let execution = dispatch.execution;
                tokio::spawn(async move {
                    let result = execution.run().await;
                    let _ = tx.send(Internal::ToolFinished(result));
                });

                if let Some(plan) = dispatch.filler {
                    let tx = self.internal_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(plan.delay).await;
                        let _ = tx.send(Internal::FillerDue(plan));
                    });
                }

                self.track_tool_call(request, speech_id, true, None);
            },
            Err(ToolError::Busy { pending }) => {
                // The request never existed as far as history is concerned
                self.report_error(ToolError::Busy { pending }.into());
            },
            Err(e) => {
                self.emit(AgentEvent::FunctionCallsStarted {
                    request: request.clone(),
                });
                let result = ToolCallResult::failure(&request, e.to_string(), Duration::ZERO);
                self.report_error(e.into());
                self.track_tool_call(request, speech_id, false, Some(result));
            },
        }
    }

    fn track_tool_call(
        &mut self,
        request: ToolCallRequest,
        speech_id: &str,
        dispatched: bool,
        result: Option<ToolCallResult>,
    ) {
        let reply_speech = match self.find_speech_mut(speech_id) {
            Some(speech) => {
                speech.tool_call = Some(request.clone());
                Some(speech_id.to_string())
            },
            None => {
                // Reply already gone: the request turn is committed here
                self.history.push(Turn::assistant_tool_call("", request.clone()));
                None
            },
        };

        self.tool = Some(ToolInFlight {
            request,
            dispatched,
            result,
            reply_speech,
            filler_speech: None,
            filler_turn: None,
            suppressed: false,
            reply_released: false,
        });
        self.try_finish_tool();
    }

    fn on_filler_due(&mut self, plan: FillerPlan) {
        let pending = self
            .tool
            .as_ref()
            .is_some_and(|t| t.request.id == plan.call_id && t.result.is_none());
        if !pending || !self.coordinator.claim_filler(&plan.call_id) {
            tracing::debug!(session_id = %self.id, call_id = %plan.call_id, "Filler skipped");
            return;
        }

        tracing::info!(session_id = %self.id, call_id = %plan.call_id, text = %plan.text, "Speaking filler");
        let id = self.next_speech_id();
        let options = SayOptions::new()
            .allow_interruptions(self.options.allow_interruptions)
            .add_to_history(plan.add_to_history);
        let (speech, _done) = Speech::new(id.clone(), SpeechSource::Filler, options);
        if let Some(tool) = self.tool.as_mut() {
            tool.filler_speech = Some(id);
        }
        self.enqueue(speech.with_text(&plan.text));
    }

    fn on_tool_finished(&mut self, result: ToolCallResult) {
        let expected = self
            .tool
            .as_ref()
            .is_some_and(|t| t.dispatched && t.result.is_none() && t.request.id == result.call_id);
        if !expected {
            // Logged by the coordinator
            if let Err(e) = self.coordinator.complete(result) {
                self.emit(AgentEvent::Error(e.into()));
            }
            return;
        }

        match self.coordinator.complete(result) {
            Ok(completed) => {
                tracing::info!(
                    session_id = %self.id,
                    call_id = %completed.result.call_id,
                    tool = %completed.result.name,
                    success = completed.result.is_success(),
                    duration_ms = completed.result.duration.as_millis() as u64,
                    "Tool call finished"
                );
                self.record(UsageEvent::ToolCallComplete {
                    name: completed.result.name.clone(),
                    duration: completed.result.duration,
                    success: completed.result.is_success(),
                });
                if let ToolOutcome::Failure(message) = &completed.result.outcome {
                    self.report_error(Error::ToolExecutionFailure {
                        tool: completed.result.name.clone(),
                        message: message.clone(),
                    });
                }
                if let Some(tool) = self.tool.as_mut() {
                    tool.suppressed |= completed.suppressed;
                    tool.result = Some(completed.result);
                }
                self.try_finish_tool();
            },
            Err(e) => self.emit(AgentEvent::Error(e.into())),
        }
    }

    /// Fold the result into history once nothing spoken for the call is left
    fn try_finish_tool(&mut self) {
        if !self.tool.as_ref().is_some_and(ToolInFlight::settled) {
            return;
        }
        let Some(tool) = self.tool.take() else {
            return;
        };
        let Some(result) = tool.result else {
            return;
        };

        self.history.push(Turn::tool_result(&result));
        if let Some((speech_id, turn)) = tool.filler_turn {
            self.commit_assistant(&speech_id, turn);
        }
        self.emit(AgentEvent::FunctionCallsFinished { result });

        if tool.suppressed {
            tracing::debug!(session_id = %self.id, call_id = %tool.request.id, "Tool answer suppressed");
        } else {
            self.reply_requested = true;
        }
        self.maybe_start_reply();
    }

    /// Answer a new question once the superseded call finishes, or after
    /// `superseded_wait` at the latest
    fn bound_superseded_wait(&self) {
        let Some(tool) = self.tool.as_ref().filter(|t| t.dispatched && t.result.is_none()) else {
            return;
        };
        let call_id = tool.request.id.clone();
        let wait = self.options.tools.superseded_wait;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = tx.send(Internal::SupersededWaitElapsed(call_id));
        });
    }

    fn on_superseded_wait_elapsed(&mut self, call_id: &str) {
        let Some(tool) = self
            .tool
            .as_mut()
            .filter(|t| t.request.id == call_id && t.result.is_none())
        else {
            return;
        };
        tracing::debug!(session_id = %self.id, call_id, "Replying without waiting for superseded call");
        tool.reply_released = true;
        self.maybe_start_reply();
    }

    fn suppress_tool(&mut self) {
        if let Some(tool) = self.tool.as_mut() {
            tool.suppressed = true;
            if tool.dispatched {
                self.coordinator.suppress();
            }
            if let Some(filler_id) = tool.filler_speech.clone() {
                if let Some(pos) = self.queue.iter().position(|s| s.id == filler_id) {
                    if let Some(filler) = self.queue.remove(pos) {
                        self.retire_speech(filler, None);
                    }
                }
            }
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    fn teardown(&mut self) -> UsageSummary {
        if let Some(generation) = self.generation.take() {
            generation.cancel.cancel();
        }
        if let Some(speech) = self.current.take() {
            speech.cancel.cancel();
        }
        for speech in self.queue.drain(..) {
            speech.cancel.cancel();
        }
        self.coordinator.suppress();

        let summary = self.usage.snapshot();
        tracing::info!(
            session_id = %self.id,
            turns = self.history.len(),
            generations = summary.generation.calls,
            utterances = summary.synthesis.utterances,
            tool_calls = summary.tools.calls,
            audio_ms = summary.synthesis.audio_duration.as_millis() as u64,
            "Session usage summary"
        );
        self.set_state(PipelineState::Idle);
        summary
    }
}

fn generation_usage(stats: &GenerationStats) -> UsageEvent {
    UsageEvent::GenerationComplete {
        time_to_first_fragment: stats.time_to_first_fragment,
        duration: stats.duration,
        characters: stats.characters,
        prompt_tokens: stats.prompt_tokens,
        completion_tokens: stats.completion_tokens,
        tool_call: stats.tool_call,
        cancelled: stats.cancelled,
    }
}

/// Next item, or never once the stream has been dropped
async fn next_or_pending<S>(stream: &mut Option<S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
