//! Tools for the voice loop
//!
//! Tools are registered by name before a session starts. Each declares a
//! JSON schema for its arguments, compiled at registration and checked
//! before every dispatch. The coordinator enforces one outstanding call
//! per session and decides whether a filler may cover the wait.

pub mod builtin;
pub mod coordinator;
pub mod registry;
pub mod tool;

pub use builtin::{register_builtin_tools, TimeTool, WeatherTool};
pub use coordinator::{
    CompletedCall, CoordinatorConfig, Dispatch, FillerPlan, ToolCoordinator, ToolExecution,
};
pub use registry::ToolRegistry;
pub use tool::{SchemaBuilder, Tool, ToolContext};

use thiserror::Error;

/// Tool errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Invalid schema for '{tool}': {message}")]
    InvalidSchema { tool: String, message: String },

    #[error("Tool busy: call {pending} is still outstanding")]
    Busy { pending: String },

    #[error("Tool '{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    /// Returned by handlers
    #[error("{0}")]
    Failed(String),

    #[error("Tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },

    #[error("Tool result {0} does not match an outstanding request")]
    Unmatched(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        ToolError::Failed(message.into())
    }

    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        ToolError::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn timeout(tool: impl Into<String>, secs: u64) -> Self {
        ToolError::Timeout {
            tool: tool.into(),
            secs,
        }
    }
}

impl From<ToolError> for voice_loop_core::Error {
    fn from(err: ToolError) -> Self {
        use voice_loop_core::Error;
        match err {
            ToolError::NotFound(name) => Error::UnknownTool(name),
            ToolError::InvalidArguments { tool, message } => {
                Error::InvalidToolArguments { tool, message }
            },
            ToolError::InvalidSchema { .. } => Error::Configuration(err.to_string()),
            ToolError::Busy { pending } => Error::ToolBusy { pending },
            ToolError::Timeout { ref tool, .. } => Error::ToolExecutionFailure {
                tool: tool.clone(),
                message: err.to_string(),
            },
            ToolError::Failed(message) => Error::ToolExecutionFailure {
                tool: String::new(),
                message,
            },
            ToolError::Execution { tool, message } => Error::ToolExecutionFailure { tool, message },
            ToolError::Unmatched(id) => Error::UnmatchedToolResult(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_loop_core::Error;

    #[test]
    fn test_rejections_map_to_core_taxonomy() {
        let err: Error = ToolError::NotFound("fly".into()).into();
        assert_eq!(err, Error::UnknownTool("fly".into()));
        assert!(err.is_tool_failure());

        let err: Error = ToolError::Busy { pending: "c1".into() }.into();
        assert_eq!(err.kind(), "tool_busy");

        let err: Error = ToolError::timeout("get_weather", 30).into();
        assert!(matches!(err, Error::ToolExecutionFailure { ref tool, .. } if tool == "get_weather"));

        let err: Error = ToolError::InvalidSchema {
            tool: "x".into(),
            message: "bad".into(),
        }
        .into();
        assert!(err.is_fatal());
    }
}
