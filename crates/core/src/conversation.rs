//! Conversation history, turns, and tool-call payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// Persona / instructions
    System,
    User,
    Assistant,
    /// Result of a tool invocation
    Tool,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::System => "system",
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::Tool => "tool",
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured request from the generator to invoke a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation id, unique per session
    pub id: String,
    /// Registered tool name
    pub name: String,
    /// JSON object of arguments
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    /// Create a request with a fresh correlation id
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Get argument as string
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }

    /// Arguments as a JSON value, for schema validation
    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// Outcome of a tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum ToolOutcome {
    Success(String),
    Failure(String),
}

/// Result of a tool call, matched to its request by `call_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
    /// Time spent inside the handler
    pub duration: Duration,
}

impl ToolCallResult {
    pub fn success(request: &ToolCallRequest, text: impl Into<String>, duration: Duration) -> Self {
        Self {
            call_id: request.id.clone(),
            name: request.name.clone(),
            outcome: ToolOutcome::Success(text.into()),
            duration,
        }
    }

    pub fn failure(
        request: &ToolCallRequest,
        detail: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            call_id: request.id.clone(),
            name: request.name.clone(),
            outcome: ToolOutcome::Failure(detail.into()),
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }

    /// Text placed into the `tool` turn.
    ///
    /// Failures are phrased as an instruction so the generator voices the
    /// problem in its own words instead of reading a raw error.
    pub fn context_text(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success(text) => text.clone(),
            ToolOutcome::Failure(detail) => format!(
                "The {} tool failed ({}). Apologize briefly and tell the user it could not be completed.",
                self.name, detail
            ),
        }
    }
}

/// A single turn in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    /// Set on assistant turns that requested a tool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRequest>,
    /// Set on tool turns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Assistant turn cut short; `text` holds only what was played
    #[serde(default)]
    pub interrupted: bool,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            tool_call: None,
            tool_call_id: None,
            interrupted: false,
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(TurnRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, text)
    }

    /// Assistant turn carrying the text spoken before a tool call plus the call itself
    pub fn assistant_tool_call(text: impl Into<String>, request: ToolCallRequest) -> Self {
        Self {
            tool_call: Some(request),
            ..Self::new(TurnRole::Assistant, text)
        }
    }

    pub fn tool_result(result: &ToolCallResult) -> Self {
        Self {
            tool_call_id: Some(result.call_id.clone()),
            ..Self::new(TurnRole::Tool, result.context_text())
        }
    }

    pub fn with_interrupted(mut self, interrupted: bool) -> Self {
        self.interrupted = interrupted;
        self
    }

    /// True for an assistant turn that actually said something
    pub fn is_assistant_utterance(&self) -> bool {
        self.role == TurnRole::Assistant && !self.text.trim().is_empty()
    }
}

/// Ordered, append-only conversation history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextHistory {
    turns: Vec<Turn>,
}

impl ContextHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History seeded with a persona prompt
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let mut history = Self::new();
        if !prompt.trim().is_empty() {
            history.push(Turn::system(prompt));
        }
        history
    }

    /// Append a turn. Timestamps are clamped so the history stays chronological.
    pub fn push(&mut self, mut turn: Turn) {
        if let Some(last) = self.turns.last() {
            if turn.timestamp < last.timestamp {
                turn.timestamp = last.timestamp;
            }
        }
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Whether the agent's latest contribution is already spoken text
    pub fn ends_with_assistant_utterance(&self) -> bool {
        self.last().map(Turn::is_assistant_utterance).unwrap_or(false)
    }

    /// Whether the tool turn for `call_id` follows its request
    pub fn has_result_for(&self, call_id: &str) -> bool {
        self.turns
            .iter()
            .any(|t| t.role == TurnRole::Tool && t.tool_call_id.as_deref() == Some(call_id))
    }
}
