//! Local time

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::tool::{SchemaBuilder, Tool, ToolContext};
use crate::ToolError;

#[derive(Debug, Default)]
pub struct TimeTool;

impl TimeTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "get_time"
    }

    fn description(&self) -> &str {
        "Called to retrieve the current local time"
    }

    fn schema(&self) -> Value {
        SchemaBuilder::new().build()
    }

    async fn execute(&self, _args: Map<String, Value>, _ctx: &ToolContext) -> Result<String, ToolError> {
        Ok(chrono::Local::now().format("%H:%M:%S").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_time_format() {
        let ctx = ToolContext::new("s1", "caller", "c1");
        let time = TimeTool::new().execute(Map::new(), &ctx).await.unwrap();

        let parts: Vec<&str> = time.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_digit())));
    }
}
