//! Public agent API
//!
//! ```ignore
//! let agent = VoiceAgent::builder()
//!     .recognizer(recognizer)
//!     .vad(vad)
//!     .generator(engine)
//!     .synthesizer(tts)
//!     .sink(sink)
//!     .tool(WeatherTool::new("https://wttr.in"))
//!     .build()?;
//!
//! let handle = agent.start(Participant::new("caller")).await?;
//! let summary = handle.shutdown().await?;
//! ```

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;
use voice_loop_config::{constants::session::COMMAND_BUFFER, ToolsConfig};
use voice_loop_core::{
    AudioSink, EndOfTurnModel, GenerationEngine, Participant, PipelineState,
    RecognitionEngine, SynthesisEngine, Turn, VoiceActivityDetector,
};
use voice_loop_llm::{PromptBuilder, ResponseGenerator};
use voice_loop_pipeline::{PipelineError, SessionClock, SynthesisController, TranscriptAdapter};
use voice_loop_tools::{register_builtin_tools, Tool, ToolCoordinator, ToolRegistry};

use crate::events::{AgentEvent, AgentEventKind, EventEmitter};
use crate::options::AgentOptions;
use crate::orchestrator::{Command, Session, SessionParts};
use crate::speech::{SayOptions, SpeechHandle};
use crate::usage::UsageSummary;
use crate::AgentError;

#[derive(Default)]
pub struct VoiceAgentBuilder {
    recognizer: Option<Arc<dyn RecognitionEngine>>,
    vad: Option<Arc<dyn VoiceActivityDetector>>,
    generator: Option<Arc<dyn GenerationEngine>>,
    synthesizer: Option<Arc<dyn SynthesisEngine>>,
    sink: Option<Arc<dyn AudioSink>>,
    end_of_turn: Option<Arc<dyn EndOfTurnModel>>,
    tools: Vec<Arc<dyn Tool>>,
    builtin_tools: Option<ToolsConfig>,
    options: AgentOptions,
}

impl VoiceAgentBuilder {
    pub fn recognizer(mut self, recognizer: Arc<dyn RecognitionEngine>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn vad(mut self, vad: Arc<dyn VoiceActivityDetector>) -> Self {
        self.vad = Some(vad);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn GenerationEngine>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn SynthesisEngine>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Semantic end-of-turn model; without one turns end on silence alone
    pub fn end_of_turn_model(mut self, model: Arc<dyn EndOfTurnModel>) -> Self {
        self.end_of_turn = Some(model);
        self
    }

    pub fn tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Also register `get_weather` and `get_time`
    pub fn builtin_tools(mut self, config: ToolsConfig) -> Self {
        self.builtin_tools = Some(config);
        self
    }

    pub fn options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<VoiceAgent, AgentError> {
        let recognizer = required(self.recognizer, "recognizer")?;
        let vad = required(self.vad, "vad")?;
        let generator = required(self.generator, "generator")?;
        let synthesizer = required(self.synthesizer, "synthesizer")?;
        let sink = required(self.sink, "sink")?;

        validate_options(&self.options)?;

        let mut registry = ToolRegistry::new();
        if let Some(config) = &self.builtin_tools {
            register_builtin_tools(&mut registry, config)?;
        }
        for tool in self.tools {
            registry.register_arc(tool)?;
        }

        tracing::debug!(
            recognizer = recognizer.model_name(),
            generator = generator.model_name(),
            synthesizer = synthesizer.model_name(),
            tools = ?registry.tool_names(),
            "Voice agent built"
        );

        Ok(VoiceAgent {
            recognizer,
            vad,
            generator,
            synthesizer,
            sink,
            end_of_turn: self.end_of_turn,
            registry: Arc::new(registry),
            options: self.options,
            emitter: Arc::new(EventEmitter::new()),
        })
    }
}

fn required<T: ?Sized>(value: Option<Arc<T>>, name: &str) -> Result<Arc<T>, AgentError> {
    value.ok_or_else(|| AgentError::Configuration(format!("{} is required", name)))
}

fn validate_options(options: &AgentOptions) -> Result<(), AgentError> {
    if !(0.0..=1.0).contains(&options.end_of_turn_threshold) {
        return Err(AgentError::Configuration(format!(
            "end_of_turn_threshold must be between 0.0 and 1.0, got {}",
            options.end_of_turn_threshold
        )));
    }
    if options.synthesis.chunk_length_schedule.is_empty() {
        return Err(AgentError::Configuration(
            "chunk_length_schedule must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// A configured agent; each [`start`](VoiceAgent::start) runs one session
pub struct VoiceAgent {
    recognizer: Arc<dyn RecognitionEngine>,
    vad: Arc<dyn VoiceActivityDetector>,
    generator: Arc<dyn GenerationEngine>,
    synthesizer: Arc<dyn SynthesisEngine>,
    sink: Arc<dyn AudioSink>,
    end_of_turn: Option<Arc<dyn EndOfTurnModel>>,
    registry: Arc<ToolRegistry>,
    options: AgentOptions,
    emitter: Arc<EventEmitter>,
}

impl VoiceAgent {
    pub fn builder() -> VoiceAgentBuilder {
        VoiceAgentBuilder::default()
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// Subscribe for every session started after this call
    pub fn on<F>(&self, kind: AgentEventKind, callback: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.emitter.on(kind, callback);
    }

    /// Start a session for `participant`.
    ///
    /// Fails only if the recognizer cannot be opened. Must be called from
    /// within a tokio runtime.
    pub async fn start(&self, participant: Participant) -> Result<AgentHandle, AgentError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let recognition = self.options.recognition_options(&participant);

        tracing::info!(
            session_id = %session_id,
            participant = %participant.identity,
            name = %participant.name,
            kind = ?participant.kind,
            model = %recognition.model,
            "Starting voice session"
        );

        let raw = self
            .recognizer
            .connect(&recognition)
            .await
            .map_err(|e| PipelineError::Recognition(e.to_string()))?;

        let clock = SessionClock::start();
        let transcripts = TranscriptAdapter::new().adapt(raw, clock);
        let vad = self.vad.events();

        let emitter = Arc::new(EventEmitter::new());
        emitter.inherit(&self.emitter);

        let prompt = PromptBuilder::new(&self.options.generation)
            .with_system_prompt(self.options.generation.system_prompt.clone())
            .with_tools(self.registry.definitions());
        let generator = ResponseGenerator::new(self.generator.clone(), prompt);

        let synthesis = SynthesisController::new(
            self.synthesizer.clone(),
            self.sink.clone(),
            self.options.synthesis.voice.clone(),
            self.options.synthesis.chunk_length_schedule.clone(),
        );

        let mut coordinator = ToolCoordinator::new(self.registry.clone(), self.options.tools.clone());
        if let Some(seed) = self.options.filler_seed {
            coordinator = coordinator.with_seed(seed);
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (interrupt_tx, interrupt_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PipelineState::Idle);

        let parts = SessionParts {
            session_id: session_id.clone(),
            participant,
            options: self.options.clone(),
            clock,
            generator,
            synthesis,
            coordinator,
            end_of_turn: self.end_of_turn.clone(),
            emitter: emitter.clone(),
            state_tx,
            interrupt_tx,
        };

        let span = tracing::info_span!("session", session_id = %session_id);
        tokio::spawn(Session::run(parts, command_rx, interrupt_rx, vad, transcripts).instrument(span));

        Ok(AgentHandle {
            session_id,
            commands: command_tx,
            state: state_rx,
            emitter,
        })
    }
}

/// Caller-side handle to a running session
#[derive(Clone)]
pub struct AgentHandle {
    session_id: String,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<PipelineState>,
    emitter: Arc<EventEmitter>,
}

impl AgentHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn say(
        &self,
        text: impl Into<String>,
        allow_interruptions: bool,
    ) -> Result<SpeechHandle, AgentError> {
        let options = SayOptions::new().allow_interruptions(allow_interruptions);
        self.say_with(text, options).await
    }

    pub async fn say_with(
        &self,
        text: impl Into<String>,
        options: SayOptions,
    ) -> Result<SpeechHandle, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Say {
            text: text.into(),
            options,
            reply,
        })
        .await?;
        rx.await.map_err(|_| AgentError::SessionClosed)
    }

    /// Subscribe for this session only
    pub fn on<F>(&self, kind: AgentEventKind, callback: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.emitter.on(kind, callback);
    }

    /// Snapshot of the conversation so far
    pub async fn history(&self) -> Result<Vec<Turn>, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::History { reply }).await?;
        rx.await.map_err(|_| AgentError::SessionClosed)
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Stop the session and return its usage summary.
    ///
    /// Speech in flight is cut off; a running tool handler is left to finish
    /// on its own.
    pub async fn shutdown(&self) -> Result<UsageSummary, AgentError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| AgentError::SessionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn send(&self, command: Command) -> Result<(), AgentError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AgentError::SessionClosed)
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish()
    }
}
