//! Scripted collaborators for session tests
//!
//! Audio is simulated at 10 ms per character so playback takes virtual
//! time; tests run with paused time and advance it by sleeping.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use voice_loop_agent::{AgentEvent, AgentEventKind, AgentHandle, AgentOptions, VoiceAgent};
use voice_loop_core::{
    AudioFrame, AudioSink, AudioStream, EndOfTurnModel, Error, FragmentStream, GenerateRequest,
    GenerationEngine, GenerationFragment, Participant, RecognitionEngine, RecognitionOptions,
    RecognizerOutput, RecognizerStream, Role, SynthesisEngine, ToolCallRequest, Turn, VadStream,
    VoiceActivity, VoiceActivityDetector, VoiceConfig,
};
use voice_loop_tools::{SchemaBuilder, Tool, ToolContext, ToolError};

pub const SAMPLE_RATE: u32 = 1000;
pub const FRAGMENT_GAP: Duration = Duration::from_millis(20);

// =========================================================================
// Input
// =========================================================================

pub struct ChannelVad {
    rx: Mutex<Option<mpsc::UnboundedReceiver<VoiceActivity>>>,
}

impl VoiceActivityDetector for ChannelVad {
    fn events(&self) -> VadStream {
        match self.rx.lock().take() {
            Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
            None => Box::pin(futures::stream::pending()),
        }
    }
}

/// Never reports voice activity
pub struct SilentVad;

impl VoiceActivityDetector for SilentVad {
    fn events(&self) -> VadStream {
        Box::pin(futures::stream::pending())
    }
}

pub struct ChannelRecognizer {
    rx: Mutex<Option<mpsc::UnboundedReceiver<voice_loop_core::Result<RecognizerOutput>>>>,
    pub connected_with: Mutex<Option<RecognitionOptions>>,
    fail_connect: bool,
}

#[async_trait]
impl RecognitionEngine for ChannelRecognizer {
    async fn connect(&self, options: &RecognitionOptions) -> voice_loop_core::Result<RecognizerStream> {
        if self.fail_connect {
            return Err(Error::RecognitionFailure("connection refused".into()));
        }
        *self.connected_with.lock() = Some(options.clone());
        match self.rx.lock().take() {
            Some(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            None => Ok(Box::pin(futures::stream::pending())),
        }
    }

    fn model_name(&self) -> &str {
        "channel-recognizer"
    }
}

// =========================================================================
// Generation
// =========================================================================

pub type Script = Box<dyn Fn(&GenerateRequest) -> Vec<voice_loop_core::Result<GenerationFragment>> + Send + Sync>;

/// Answers each request from a closure, one fragment every [`FRAGMENT_GAP`]
pub struct ScriptedGenerator {
    script: Script,
    pub requests: Mutex<Vec<(Instant, GenerateRequest)>>,
}

impl ScriptedGenerator {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&GenerateRequest) -> Vec<voice_loop_core::Result<GenerationFragment>> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn request(&self, index: usize) -> GenerateRequest {
        self.requests.lock()[index].1.clone()
    }
}

impl GenerationEngine for ScriptedGenerator {
    fn generate(&self, request: GenerateRequest) -> FragmentStream {
        let fragments = (self.script)(&request);
        self.requests.lock().push((Instant::now(), request));
        Box::pin(futures::stream::iter(fragments).then(|fragment| async move {
            tokio::time::sleep(FRAGMENT_GAP).await;
            fragment
        }))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn text(delta: &str) -> voice_loop_core::Result<GenerationFragment> {
    Ok(GenerationFragment::text(delta))
}

pub fn tool_call(name: &str, arguments: Value) -> voice_loop_core::Result<GenerationFragment> {
    let arguments: Map<String, Value> = arguments.as_object().cloned().unwrap_or_default();
    Ok(GenerationFragment::ToolCall(ToolCallRequest::new(name, arguments)))
}

/// Content of the most recent tool message, if the request has one
pub fn last_tool_content(request: &GenerateRequest) -> Option<String> {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Tool)
        .map(|m| m.content.clone())
}

pub fn last_message_role(request: &GenerateRequest) -> Option<Role> {
    request.messages.last().map(|m| m.role)
}

pub struct FixedEndOfTurn(pub f32);

#[async_trait]
impl EndOfTurnModel for FixedEndOfTurn {
    async fn end_of_turn_probability(&self, _history: &[Turn], _transcript: &str) -> voice_loop_core::Result<f32> {
        Ok(self.0)
    }
}

// =========================================================================
// Output
// =========================================================================

/// One 10 ms frame per character
pub struct CharSynthesizer;

impl SynthesisEngine for CharSynthesizer {
    fn synthesize(&self, text: &str, _voice: &VoiceConfig) -> AudioStream {
        let frames: Vec<voice_loop_core::Result<AudioFrame>> = text
            .chars()
            .map(|_| Ok(AudioFrame::silence(Duration::from_millis(10), SAMPLE_RATE)))
            .collect();
        Box::pin(futures::stream::iter(frames))
    }

    fn model_name(&self) -> &str {
        "char-synth"
    }
}

/// Plays frames in real time and records when each one started
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<Instant>>,
    clears: Mutex<usize>,
}

impl RecordingSink {
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn frame_times(&self) -> Vec<Instant> {
        self.frames.lock().clone()
    }

    pub fn clear_count(&self) -> usize {
        *self.clears.lock()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, frame: AudioFrame) -> voice_loop_core::Result<()> {
        self.frames.lock().push(Instant::now());
        tokio::time::sleep(frame.duration()).await;
        Ok(())
    }

    fn clear(&self) {
        *self.clears.lock() += 1;
    }
}

// =========================================================================
// Tools
// =========================================================================

pub const WEATHER_REPORT: &str = "Clear +18°C";
pub const WEATHER_LATENCY: Duration = Duration::from_millis(400);

/// `get_weather` with a fixed report and a single filler
pub struct FakeWeather {
    pub calls: Arc<Mutex<Vec<(String, ToolContext)>>>,
    latency: Duration,
    failure: Option<String>,
}

impl FakeWeather {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: WEATHER_LATENCY,
            failure: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail after the usual latency with this message
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }
}

#[async_trait]
impl Tool for FakeWeather {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a location"
    }

    fn schema(&self) -> Value {
        SchemaBuilder::new()
            .param("location", "string", "The location to get the weather for", true)
            .build()
    }

    fn filler_templates(&self) -> Vec<String> {
        vec!["Let me check the weather in {location} for you.".to_string()]
    }

    async fn execute(&self, args: Map<String, Value>, ctx: &ToolContext) -> Result<String, ToolError> {
        let location = args
            .get("location")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.calls.lock().push((location, ctx.clone()));
        tokio::time::sleep(self.latency).await;
        match &self.failure {
            Some(message) => Err(ToolError::failed(message.clone())),
            None => Ok(WEATHER_REPORT.to_string()),
        }
    }
}

pub fn weather_args(location: &str) -> Value {
    json!({ "location": location })
}

// =========================================================================
// Harness
// =========================================================================

/// `RUST_LOG=voice_loop=debug cargo test` shows the session loop
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_options() -> AgentOptions {
    AgentOptions::default()
        .with_endpointing(Duration::from_millis(100), Duration::from_millis(300))
        .with_greeting(None)
        .with_filler_seed(7)
}

pub struct Harness {
    pub handle: AgentHandle,
    pub vad: mpsc::UnboundedSender<VoiceActivity>,
    pub stt: mpsc::UnboundedSender<voice_loop_core::Result<RecognizerOutput>>,
    pub generator: Arc<ScriptedGenerator>,
    pub sink: Arc<RecordingSink>,
    pub recognizer: Arc<ChannelRecognizer>,
    pub events: Arc<Mutex<Vec<AgentEvent>>>,
}

pub struct HarnessBuilder {
    generator: Arc<ScriptedGenerator>,
    options: AgentOptions,
    tools: Vec<Arc<dyn Tool>>,
    end_of_turn: Option<Arc<dyn EndOfTurnModel>>,
    participant: Participant,
}

impl HarnessBuilder {
    pub fn new(generator: ScriptedGenerator) -> Self {
        Self {
            generator: Arc::new(generator),
            options: test_options(),
            tools: Vec::new(),
            end_of_turn: None,
            participant: Participant::new("caller"),
        }
    }

    pub fn options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn end_of_turn(mut self, model: Arc<dyn EndOfTurnModel>) -> Self {
        self.end_of_turn = Some(model);
        self
    }

    pub fn participant(mut self, participant: Participant) -> Self {
        self.participant = participant;
        self
    }

    pub async fn start(self) -> Harness {
        init_test_tracing();
        let (vad_tx, vad_rx) = mpsc::unbounded_channel();
        let (stt_tx, stt_rx) = mpsc::unbounded_channel();
        let recognizer = Arc::new(ChannelRecognizer {
            rx: Mutex::new(Some(stt_rx)),
            connected_with: Mutex::new(None),
            fail_connect: false,
        });
        let sink = Arc::new(RecordingSink::default());

        let mut builder = VoiceAgent::builder()
            .recognizer(recognizer.clone())
            .vad(Arc::new(ChannelVad {
                rx: Mutex::new(Some(vad_rx)),
            }))
            .generator(self.generator.clone())
            .synthesizer(Arc::new(CharSynthesizer))
            .sink(sink.clone())
            .tools(self.tools)
            .options(self.options);
        if let Some(model) = self.end_of_turn {
            builder = builder.end_of_turn_model(model);
        }
        let agent = builder.build().unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in ALL_KINDS {
            let events = events.clone();
            agent.on(kind, move |event| events.lock().push(event.clone()));
        }

        let handle = agent.start(self.participant).await.unwrap();
        Harness {
            handle,
            vad: vad_tx,
            stt: stt_tx,
            generator: self.generator,
            sink,
            recognizer,
            events,
        }
    }
}

pub const ALL_KINDS: [AgentEventKind; 13] = [
    AgentEventKind::UserStartedSpeaking,
    AgentEventKind::UserStoppedSpeaking,
    AgentEventKind::UserSpeechCommitted,
    AgentEventKind::AgentStartedSpeaking,
    AgentEventKind::AgentStoppedSpeaking,
    AgentEventKind::AgentSpeechCommitted,
    AgentEventKind::AgentSpeechInterrupted,
    AgentEventKind::Interruption,
    AgentEventKind::FunctionCallsStarted,
    AgentEventKind::FunctionCallsFinished,
    AgentEventKind::MetricsCollected,
    AgentEventKind::StateChanged,
    AgentEventKind::Error,
];

/// A recognizer that refuses to connect
pub fn refusing_recognizer() -> Arc<ChannelRecognizer> {
    Arc::new(ChannelRecognizer {
        rx: Mutex::new(None),
        connected_with: Mutex::new(None),
        fail_connect: true,
    })
}

impl Harness {
    /// Voice start, a final transcript, then voice stop
    pub async fn user_says(&self, words: &str) {
        self.vad.send(VoiceActivity::start(Duration::ZERO)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.user_finishes(words).await;
    }

    /// Final transcript and voice stop for speech already under way
    pub async fn user_finishes(&self, words: &str) {
        self.stt.send(Ok(RecognizerOutput::final_text(words))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.vad.send(VoiceActivity::stop(Duration::ZERO)).unwrap();
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().clone()
    }

    pub fn events_of(&self, kind: AgentEventKind) -> Vec<AgentEvent> {
        self.events().into_iter().filter(|e| e.kind() == kind).collect()
    }

    /// Poll history until `done` holds, advancing virtual time
    pub async fn wait_for_history<F>(&self, done: F) -> Vec<Turn>
    where
        F: Fn(&[Turn]) -> bool,
    {
        for _ in 0..400 {
            let history = self.handle.history().await.unwrap();
            if done(&history) {
                return history;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("history never settled: {:#?}", self.handle.history().await.unwrap());
    }

    /// Poll until `done` holds over the recorded events
    pub async fn wait_for_events<F>(&self, done: F)
    where
        F: Fn(&[AgentEvent]) -> bool,
    {
        for _ in 0..400 {
            if done(&self.events()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("events never arrived: {:#?}", self.events());
    }

    pub async fn wait_for_frames(&self, count: usize) {
        for _ in 0..1000 {
            if self.sink.frame_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("only {} frames played", self.sink.frame_count());
    }
}

pub fn last_assistant(history: &[Turn]) -> Option<&Turn> {
    history
        .iter()
        .rev()
        .find(|t| t.role == voice_loop_core::TurnRole::Assistant)
}
