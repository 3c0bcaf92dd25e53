//! Agent events and per-kind subscriber lists

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use voice_loop_core::{Error, PipelineState, ToolCallRequest, ToolCallResult};

use crate::usage::UsageEvent;

/// Event kind used as the subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentEventKind {
    UserStartedSpeaking,
    UserStoppedSpeaking,
    UserSpeechCommitted,
    AgentStartedSpeaking,
    AgentStoppedSpeaking,
    AgentSpeechCommitted,
    AgentSpeechInterrupted,
    Interruption,
    FunctionCallsStarted,
    FunctionCallsFinished,
    MetricsCollected,
    StateChanged,
    Error,
}

impl AgentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentEventKind::UserStartedSpeaking => "user_started_speaking",
            AgentEventKind::UserStoppedSpeaking => "user_stopped_speaking",
            AgentEventKind::UserSpeechCommitted => "user_speech_committed",
            AgentEventKind::AgentStartedSpeaking => "agent_started_speaking",
            AgentEventKind::AgentStoppedSpeaking => "agent_stopped_speaking",
            AgentEventKind::AgentSpeechCommitted => "agent_speech_committed",
            AgentEventKind::AgentSpeechInterrupted => "agent_speech_interrupted",
            AgentEventKind::Interruption => "interruption",
            AgentEventKind::FunctionCallsStarted => "function_calls_started",
            AgentEventKind::FunctionCallsFinished => "function_calls_finished",
            AgentEventKind::MetricsCollected => "metrics_collected",
            AgentEventKind::StateChanged => "state_changed",
            AgentEventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Agent event
///
/// Timestamps are session-relative offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    UserStartedSpeaking { at: Duration },
    UserStoppedSpeaking { at: Duration },
    /// User turn appended to history
    UserSpeechCommitted { text: String },
    /// First audio of a speech reached the sink
    AgentStartedSpeaking { speech_id: String },
    AgentStoppedSpeaking { speech_id: String, interrupted: bool },
    /// Assistant turn appended to history
    AgentSpeechCommitted { speech_id: String, text: String },
    /// Assistant turn appended with only its spoken prefix
    AgentSpeechInterrupted { speech_id: String, spoken_text: String },
    Interruption { at: Duration },
    FunctionCallsStarted { request: ToolCallRequest },
    FunctionCallsFinished { result: ToolCallResult },
    MetricsCollected(UsageEvent),
    StateChanged { old: PipelineState, new: PipelineState },
    Error(Error),
}

impl AgentEvent {
    pub fn kind(&self) -> AgentEventKind {
        match self {
            AgentEvent::UserStartedSpeaking { .. } => AgentEventKind::UserStartedSpeaking,
            AgentEvent::UserStoppedSpeaking { .. } => AgentEventKind::UserStoppedSpeaking,
            AgentEvent::UserSpeechCommitted { .. } => AgentEventKind::UserSpeechCommitted,
            AgentEvent::AgentStartedSpeaking { .. } => AgentEventKind::AgentStartedSpeaking,
            AgentEvent::AgentStoppedSpeaking { .. } => AgentEventKind::AgentStoppedSpeaking,
            AgentEvent::AgentSpeechCommitted { .. } => AgentEventKind::AgentSpeechCommitted,
            AgentEvent::AgentSpeechInterrupted { .. } => AgentEventKind::AgentSpeechInterrupted,
            AgentEvent::Interruption { .. } => AgentEventKind::Interruption,
            AgentEvent::FunctionCallsStarted { .. } => AgentEventKind::FunctionCallsStarted,
            AgentEvent::FunctionCallsFinished { .. } => AgentEventKind::FunctionCallsFinished,
            AgentEvent::MetricsCollected(_) => AgentEventKind::MetricsCollected,
            AgentEvent::StateChanged { .. } => AgentEventKind::StateChanged,
            AgentEvent::Error(_) => AgentEventKind::Error,
        }
    }
}

pub type EventCallback = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Explicit subscriber lists, one per event kind.
///
/// Callbacks run synchronously on the emitting task, in registration order.
#[derive(Default)]
pub struct EventEmitter {
    subscribers: RwLock<HashMap<AgentEventKind, Vec<EventCallback>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: AgentEventKind, callback: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn emit(&self, event: &AgentEvent) {
        // Cloned so a callback may register further subscribers
        let callbacks = match self.subscribers.read().get(&event.kind()) {
            Some(list) => list.clone(),
            None => return,
        };
        for callback in callbacks {
            callback(event);
        }
    }

    /// Copy every subscriber of `parent`, after any already registered here
    pub fn inherit(&self, parent: &EventEmitter) {
        let inherited = parent.subscribers.read().clone();
        let mut subscribers = self.subscribers.write();
        for (kind, callbacks) in inherited {
            subscribers.entry(kind).or_default().extend(callbacks);
        }
    }

    pub fn subscriber_count(&self, kind: AgentEventKind) -> usize {
        self.subscribers.read().get(&kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<AgentEventKind, usize> = self
            .subscribers
            .read()
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("EventEmitter").field("subscribers", &counts).finish()
    }
}
