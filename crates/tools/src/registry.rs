//! Tool Registry
//!
//! Maps tool names to handlers. Schemas are compiled once at registration
//! so a malformed schema fails there rather than on the first call.

use jsonschema::JSONSchema;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use voice_loop_core::{ToolCallRequest, ToolDefinition};

use crate::tool::{Tool, ToolContext};
use crate::ToolError;

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: JSONSchema,
}

/// Tool registry
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register<T: Tool>(&mut self, tool: T) -> Result<(), ToolError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        let schema = tool.schema();
        let validator =
            JSONSchema::compile(&schema).map_err(|e| ToolError::InvalidSchema {
                tool: name.clone(),
                message: e.to_string(),
            })?;

        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(name, RegisteredTool { tool, validator });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name).map(|t| &t.tool)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Sorted tool names
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions handed to the generator, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tool_names()
            .iter()
            .filter_map(|name| self.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Resolve a request to its handler and check the arguments
    pub fn validate(&self, request: &ToolCallRequest) -> Result<Arc<dyn Tool>, ToolError> {
        let entry = self
            .tools
            .get(&request.name)
            .ok_or_else(|| ToolError::NotFound(request.name.clone()))?;

        let args = request.arguments_value();
        if let Err(errors) = entry.validator.validate(&args) {
            let message = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            return Err(ToolError::invalid_arguments(&request.name, message));
        }

        Ok(entry.tool.clone())
    }

    /// Validate and run a request under a timeout
    pub async fn execute(
        &self,
        request: &ToolCallRequest,
        ctx: &ToolContext,
        default_timeout: Duration,
    ) -> Result<String, ToolError> {
        let tool = self.validate(request)?;
        run_tool(tool, request, ctx, default_timeout).await
    }
}

/// Run an already validated tool
///
/// Handler failures are tagged with the tool name.
pub(crate) async fn run_tool(
    tool: Arc<dyn Tool>,
    request: &ToolCallRequest,
    ctx: &ToolContext,
    default_timeout: Duration,
) -> Result<String, ToolError> {
    let timeout = tool.timeout().unwrap_or(default_timeout);
    let started = Instant::now();

    tracing::trace!(
        tool = %request.name,
        call_id = %ctx.call_id,
        timeout_ms = timeout.as_millis() as u64,
        "Executing tool with timeout"
    );

    let result = match tokio::time::timeout(timeout, tool.execute(request.arguments.clone(), ctx)).await
    {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(ToolError::Failed(message))) => Err(ToolError::Execution {
            tool: request.name.clone(),
            message,
        }),
        Ok(Err(e)) => Err(e),
        Err(_elapsed) => Err(ToolError::timeout(&request.name, timeout.as_secs())),
    };

    tracing::debug!(
        tool = %request.name,
        call_id = %ctx.call_id,
        ok = result.is_ok(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Tool finished"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::SchemaBuilder;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Repeat the text"
        }

        fn schema(&self) -> Value {
            SchemaBuilder::new()
                .param("text", "string", "Text to repeat", true)
                .build()
        }

        async fn execute(&self, args: Map<String, Value>, _ctx: &ToolContext) -> Result<String, ToolError> {
            match args.get("text").and_then(Value::as_str) {
                Some("fail") => Err(ToolError::failed("refused")),
                Some(text) => Ok(text.to_string()),
                None => Err(ToolError::failed("no text")),
            }
        }
    }

    struct Sleeper;

    #[async_trait]
    impl Tool for Sleeper {
        fn name(&self) -> &str {
            "sleeper"
        }

        fn description(&self) -> &str {
            "Never answers in time"
        }

        fn schema(&self) -> Value {
            SchemaBuilder::new().build()
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_secs(2))
        }

        async fn execute(&self, _args: Map<String, Value>, _ctx: &ToolContext) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    struct BrokenSchema;

    #[async_trait]
    impl Tool for BrokenSchema {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            ""
        }

        fn schema(&self) -> Value {
            json!({"type": 42})
        }

        async fn execute(&self, _args: Map<String, Value>, _ctx: &ToolContext) -> Result<String, ToolError> {
            Ok(String::new())
        }
    }

    fn request(name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest::new(name, args.as_object().cloned().unwrap_or_default())
    }

    fn ctx() -> ToolContext {
        ToolContext::new("session", "caller", "call-1")
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Echo).unwrap();
        registry.register(Sleeper).unwrap();
        registry
    }

    #[test]
    fn test_invalid_schema_rejected_at_registration() {
        let mut registry = ToolRegistry::new();
        assert!(matches!(
            registry.register(BrokenSchema),
            Err(ToolError::InvalidSchema { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_validate() {
        let registry = registry();
        assert!(registry.validate(&request("echo", json!({"text": "hi"}))).is_ok());
        assert!(matches!(
            registry.validate(&request("echo", json!({"text": 5}))),
            Err(ToolError::InvalidArguments { .. })
        ));
        assert!(matches!(
            registry.validate(&request("echo", json!({}))),
            Err(ToolError::InvalidArguments { .. })
        ));
        assert_eq!(
            registry.validate(&request("fly", json!({}))).err(),
            Some(ToolError::NotFound("fly".into()))
        );
    }

    #[test]
    fn test_definitions_sorted() {
        let names: Vec<String> = registry().definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo", "sleeper"]);
    }

    #[tokio::test]
    async fn test_execute_tags_failures() {
        let registry = registry();
        let out = registry
            .execute(&request("echo", json!({"text": "hi"})), &ctx(), Duration::from_secs(1))
            .await;
        assert_eq!(out, Ok("hi".to_string()));

        let out = registry
            .execute(&request("echo", json!({"text": "fail"})), &ctx(), Duration::from_secs(1))
            .await;
        assert_eq!(
            out,
            Err(ToolError::Execution {
                tool: "echo".into(),
                message: "refused".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_tool_timeout() {
        let out = registry()
            .execute(&request("sleeper", json!({})), &ctx(), Duration::from_secs(30))
            .await;
        assert_eq!(out, Err(ToolError::timeout("sleeper", 2)));
    }
}
