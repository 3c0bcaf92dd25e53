//! Prompt building
//!
//! Converts the session's context history into a [`GenerateRequest`].

use unicode_segmentation::UnicodeSegmentation;
use voice_loop_config::GenerationConfig;
use voice_loop_core::{GenerateRequest, Message, ToolDefinition, Turn, TurnRole};

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    temperature: f32,
    max_tokens: Option<u32>,
    /// Used only when the history carries no system turn
    system_prompt: Option<String>,
    tools: Vec<ToolDefinition>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(&GenerationConfig::default())
    }
}

impl PromptBuilder {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: None,
            tools: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Build a request from the history, oldest turn first
    pub fn build(&self, history: &[Turn]) -> GenerateRequest {
        let mut request = GenerateRequest::new()
            .with_temperature(self.temperature)
            .with_tools(self.tools.clone());

        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let has_system = history.iter().any(|t| t.role == TurnRole::System);
        if let (false, Some(prompt)) = (has_system, &self.system_prompt) {
            request = request.with_message(Message::system(prompt.clone()));
        }

        for turn in history {
            let message = match turn.role {
                TurnRole::System => Message::system(turn.text.clone()),
                TurnRole::User => Message::user(turn.text.clone()),
                TurnRole::Assistant => {
                    // Nothing was said and nothing was requested
                    if turn.text.trim().is_empty() && turn.tool_call.is_none() {
                        continue;
                    }
                    let mut message = Message::assistant(turn.text.clone());
                    message.tool_call = turn.tool_call.clone();
                    message
                },
                TurnRole::Tool => Message::tool(
                    turn.text.clone(),
                    turn.tool_call_id.clone().unwrap_or_default(),
                ),
            };
            request = request.with_message(message);
        }

        request
    }
}

/// Rough token estimate: ~4 graphemes per token
pub fn estimate_tokens(text: &str) -> usize {
    text.graphemes(true).count().div_ceil(4)
}
