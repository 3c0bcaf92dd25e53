//! Tool trait and argument schema builder

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use voice_loop_core::ToolDefinition;

use crate::ToolError;

/// Explicit context handed to every handler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub session_id: String,
    /// Identity of the participant the session serves
    pub participant: String,
    /// Correlation id of the request being executed
    pub call_id: String,
}

impl ToolContext {
    pub fn new(
        session_id: impl Into<String>,
        participant: impl Into<String>,
        call_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            participant: participant.into(),
            call_id: call_id.into(),
        }
    }
}

/// A capability the generator can invoke
///
/// Arguments reaching [`Tool::execute`] have already been validated
/// against [`Tool::schema`].
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Shown to the generator
    fn description(&self) -> &str;

    /// JSON schema of the argument object
    fn schema(&self) -> Value;

    /// Filler templates with `{arg}` placeholders
    fn filler_templates(&self) -> Vec<String> {
        Vec::new()
    }

    /// Values substituted into filler templates
    fn filler_arguments(&self, args: &Map<String, Value>) -> Map<String, Value> {
        args.clone()
    }

    /// Overrides the coordinator's default timeout
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, args: Map<String, Value>, ctx: &ToolContext)
        -> Result<String, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.schema())
    }
}

/// Builds an object schema for tool arguments
///
/// ```ignore
/// let schema = SchemaBuilder::new()
///     .param("location", "string", "The location to get the weather for", true)
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(
        mut self,
        name: impl Into<String>,
        param_type: &str,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(
            name.clone(),
            json!({ "type": param_type, "description": description.into() }),
        );
        if required {
            self.required.push(name);
        }
        self
    }

    /// Restrict an existing string parameter to fixed values
    pub fn string_enum(mut self, name: &str, values: &[&str]) -> Self {
        if let Some(Value::Object(prop)) = self.properties.get_mut(name) {
            prop.insert("enum".to_string(), json!(values));
        }
        self
    }

    /// Require non-empty text for an existing string parameter
    pub fn non_empty(mut self, name: &str) -> Self {
        if let Some(Value::Object(prop)) = self.properties.get_mut(name) {
            prop.insert("minLength".to_string(), json!(1));
        }
        self
    }

    pub fn build(self) -> Value {
        json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required,
        })
    }
}

/// Fill `{key}` placeholders from the arguments; unknown keys are left as is
pub fn render_template(template: &str, args: &Map<String, Value>) -> String {
    args.iter().fold(template.to_string(), |text, (key, value)| {
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text.replace(&format!("{{{}}}", key), &replacement)
    })
}
